pub mod sqlite_agent_repository;
pub mod sqlite_build_task_repository;

pub use sqlite_agent_repository::SqliteAgentRepository;
pub use sqlite_build_task_repository::SqliteBuildTaskRepository;
