use std::time::Duration;

use async_trait::async_trait;

use crate::SchedulerResult;

/// Agent心跳存储
///
/// 与关系库解耦的带过期时间的键值存储，只记录每个Agent最近一次心跳的毫秒时间戳。
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// 获取最近一次心跳时间（毫秒），没有记录时返回 `None`
    async fn get_heartbeat(&self, agent_id: i64, project_id: &str) -> SchedulerResult<Option<i64>>;

    async fn set_heartbeat(
        &self,
        agent_id: i64,
        project_id: &str,
        timestamp_ms: i64,
        ttl: Duration,
    ) -> SchedulerResult<()>;
}

/// 分布式锁
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试加锁，锁已被持有时返回 `false`
    async fn try_acquire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool>;

    /// 释放当前实例持有的锁
    async fn release(&self, key: &str) -> SchedulerResult<()>;
}
