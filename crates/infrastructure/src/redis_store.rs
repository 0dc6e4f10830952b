//! 基于 Redis 的心跳存储与分布式锁

use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{
    config::RedisConfig,
    traits::{DistributedLock, HeartbeatStore},
    SchedulerError, SchedulerResult,
};
use redis::aio::ConnectionManager;
use tracing::{debug, info, instrument, warn};

use crate::timeout_handler::TimeoutUtils;

/// 只删除自己持有的锁
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// 建立 Redis 连接并做一次 PING
pub async fn connect(config: &RedisConfig) -> SchedulerResult<ConnectionManager> {
    info!("Connecting to Redis: {}", config.url);

    let client = redis::Client::open(config.url.as_str()).map_err(SchedulerError::redis_error)?;
    let mut conn = client
        .get_connection_manager()
        .await
        .map_err(SchedulerError::redis_error)?;

    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(SchedulerError::redis_error)?;

    Ok(conn)
}

/// Redis 心跳存储
///
/// 每个 Agent 一个键 `{prefix}:agent:heartbeat:{project_id}:{agent_id}`，值为毫秒时间戳。
#[derive(Clone)]
pub struct RedisHeartbeatStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisHeartbeatStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn heartbeat_key(&self, agent_id: i64, project_id: &str) -> String {
        format!("{}:agent:heartbeat:{}:{}", self.key_prefix, project_id, agent_id)
    }
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    #[instrument(skip(self))]
    async fn get_heartbeat(&self, agent_id: i64, project_id: &str) -> SchedulerResult<Option<i64>> {
        let key = self.heartbeat_key(agent_id, project_id);
        let mut conn = self.conn.clone();

        let value: Option<String> = TimeoutUtils::cache(
            async {
                redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(SchedulerError::redis_error)
            },
            "get_heartbeat",
        )
        .await?;

        value
            .map(|v| {
                v.parse::<i64>().map_err(|e| {
                    SchedulerError::Serialization(format!("心跳时间格式无效 {key}={v}: {e}"))
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn set_heartbeat(
        &self,
        agent_id: i64,
        project_id: &str,
        timestamp_ms: i64,
        ttl: Duration,
    ) -> SchedulerResult<()> {
        let key = self.heartbeat_key(agent_id, project_id);
        let mut conn = self.conn.clone();

        TimeoutUtils::cache(
            async {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(timestamp_ms)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(SchedulerError::redis_error)
            },
            "set_heartbeat",
        )
        .await
    }
}

/// Redis 分布式锁
///
/// 使用 `SET NX PX` 加锁，值为当前实例的令牌；释放时校验令牌，只删除本实例持有的锁。
#[derive(Clone)]
pub struct RedisDistributedLock {
    conn: ConnectionManager,
    key_prefix: String,
    token: String,
}

impl RedisDistributedLock {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            token: instance_token(),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, key)
    }
}

/// 当前实例的锁令牌：主机名 + 随机串
pub fn instance_token() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}-{}", host, uuid::Uuid::new_v4())
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    #[instrument(skip(self))]
    async fn try_acquire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let lock_key = self.lock_key(key);
        let mut conn = self.conn.clone();

        let reply: Option<String> = TimeoutUtils::cache(
            async {
                redis::cmd("SET")
                    .arg(&lock_key)
                    .arg(&self.token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .map_err(SchedulerError::redis_error)
            },
            "acquire_lock",
        )
        .await?;

        let acquired = reply.is_some();
        debug!(lock_key = %lock_key, acquired, "尝试获取分布式锁");
        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str) -> SchedulerResult<()> {
        let lock_key = self.lock_key(key);
        let mut conn = self.conn.clone();

        let deleted: i64 = TimeoutUtils::cache(
            async {
                redis::Script::new(RELEASE_LOCK_SCRIPT)
                    .key(&lock_key)
                    .arg(&self.token)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(SchedulerError::redis_error)
            },
            "release_lock",
        )
        .await?;

        if deleted == 0 {
            warn!(lock_key = %lock_key, "释放锁时锁已过期或被其他实例持有");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_token_is_unique() {
        let a = instance_token();
        let b = instance_token();
        assert_ne!(a, b);
        assert!(a.len() > 36);
    }
}
