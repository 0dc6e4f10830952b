pub mod manager;
pub mod migrations;
pub mod postgres;
pub mod query_builder;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresAgentRepository, PostgresBuildTaskRepository};
pub use sqlite::{SqliteAgentRepository, SqliteBuildTaskRepository};
