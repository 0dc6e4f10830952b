//! 配置管理
//!
//! 配置按组件划分为数据库、Redis、密钥加密、任务调度、心跳监控和可观测性几部分，
//! 通过 [`AppConfig::load`] 从TOML文件和 `DISPATCH_` 前缀的环境变量加载。
//!
//! ```toml
//! [dispatch]
//! host_tag_reclaim_seconds = 20
//! zone_reclaim_seconds = 40
//!
//! [heartbeat]
//! interval_seconds = 5
//! ok_agent_multiplier = 10
//! ```

pub mod models;

pub use models::*;
