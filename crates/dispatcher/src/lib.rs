//! 构建任务调度服务
//!
//! - [`DispatchQueueScheduler`]: 排队任务的查询、认领、状态流转以及防饿死回收
//! - [`TaskReclaimer`]: 周期执行回收扫描
//! - [`AgentHeartbeatMonitor`]: 第三方构建机Agent的心跳超时检测

pub mod agent_heartbeat_monitor;
pub mod queue_scheduler;
pub mod reclaimer;

pub use agent_heartbeat_monitor::{
    AgentHeartbeatMonitor, AgentHeartbeatMonitorConfig, HeartbeatCheckReport, MonitorOutcome,
    HEARTBEAT_CHECK_LOCK_KEY,
};
pub use queue_scheduler::{DispatchQueueScheduler, ReclamationReport};
pub use reclaimer::TaskReclaimer;
