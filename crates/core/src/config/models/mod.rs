pub mod app_config;
pub mod database;
pub mod dispatch_heartbeat;
pub mod observability;

pub use app_config::AppConfig;
pub use database::{DatabaseConfig, RedisConfig, SecurityConfig};
pub use dispatch_heartbeat::{DispatchConfig, HeartbeatConfig};
pub use observability::ObservabilityConfig;
