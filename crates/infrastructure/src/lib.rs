pub mod crypto;
pub mod database;
pub mod error_handling;
pub mod in_memory;
pub mod redis_store;
pub mod timeout_handler;

pub use crypto::AesGcmSecretCipher;
pub use database::*;
pub use in_memory::{InMemoryDistributedLock, InMemoryHeartbeatStore};
pub use redis_store::{RedisDistributedLock, RedisHeartbeatStore};
pub use timeout_handler::{TimeoutHandler, TimeoutUtils};
