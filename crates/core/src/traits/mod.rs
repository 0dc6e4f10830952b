pub mod cipher;
pub mod heartbeat;
pub mod repository;

pub use cipher::*;
pub use heartbeat::*;
pub use repository::*;
