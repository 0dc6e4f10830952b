//! 进程内的心跳存储与锁
//!
//! 未启用 Redis 时使用，只在单实例部署下提供互斥语义。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{
    traits::{DistributedLock, HeartbeatStore},
    SchedulerResult,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct InMemoryHeartbeatStore {
    entries: Arc<Mutex<HashMap<(String, i64), (i64, Instant)>>>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn get_heartbeat(&self, agent_id: i64, project_id: &str) -> SchedulerResult<Option<i64>> {
        let mut entries = self.entries.lock().await;
        let key = (project_id.to_string(), agent_id);

        match entries.get(&key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(&key);
                Ok(None)
            }
            Some((timestamp_ms, _)) => Ok(Some(*timestamp_ms)),
            None => Ok(None),
        }
    }

    async fn set_heartbeat(
        &self,
        agent_id: i64,
        project_id: &str,
        timestamp_ms: i64,
        ttl: Duration,
    ) -> SchedulerResult<()> {
        self.entries.lock().await.insert(
            (project_id.to_string(), agent_id),
            (timestamp_ms, Instant::now() + ttl),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDistributedLock {
    locks: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();

        match locks.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> SchedulerResult<()> {
        self.locks.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expires() {
        let store = InMemoryHeartbeatStore::new();
        store
            .set_heartbeat(1, "p1", 1_000, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(store.get_heartbeat(1, "p1").await.unwrap(), Some(1_000));
        assert_eq!(store.get_heartbeat(1, "p2").await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get_heartbeat(1, "p1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_is_exclusive_until_expiry() {
        let lock = InMemoryDistributedLock::new();
        let ttl = Duration::from_secs(60);

        assert!(lock.try_acquire("job", ttl).await.unwrap());
        assert!(!lock.try_acquire("job", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(lock.try_acquire("job", ttl).await.unwrap());

        lock.release("job").await.unwrap();
        assert!(lock.try_acquire("job", ttl).await.unwrap());
    }
}
