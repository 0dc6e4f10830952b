pub mod postgres_agent_repository;
pub mod postgres_build_task_repository;

pub use postgres_agent_repository::PostgresAgentRepository;
pub use postgres_build_task_repository::PostgresBuildTaskRepository;
