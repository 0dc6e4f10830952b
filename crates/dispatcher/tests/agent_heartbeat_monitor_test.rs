use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    models::{Agent, AgentAction, AgentStatus, NodeStatus},
    traits::{AgentRepository, DistributedLock, HeartbeatStore},
    SchedulerResult,
};
use dispatch_scheduler::{
    AgentHeartbeatMonitor, AgentHeartbeatMonitorConfig, HeartbeatCheckReport, MonitorOutcome,
    HEARTBEAT_CHECK_LOCK_KEY,
};
use dispatch_testing_utils::{
    AgentBuilder, LockBehavior, MockAgentRepository, MockDistributedLock, MockHeartbeatStore,
};
use tokio::sync::broadcast;

/// 默认心跳间隔 5s：已导入Agent 50s 超时，未导入Agent 10s 超时
const OK_THRESHOLD_MS: i64 = 50_000;
const UNIMPORT_THRESHOLD_MS: i64 = 10_000;

struct Fixture {
    agents: MockAgentRepository,
    heartbeats: MockHeartbeatStore,
    lock: MockDistributedLock,
    monitor: AgentHeartbeatMonitor,
    now: DateTime<Utc>,
}

impl Fixture {
    fn new() -> Self {
        let agents = MockAgentRepository::new();
        let heartbeats = MockHeartbeatStore::new();
        let lock = MockDistributedLock::new(LockBehavior::Available);

        let monitor = AgentHeartbeatMonitor::new(
            Arc::new(agents.clone()),
            Arc::new(agents.clone()),
            Arc::new(heartbeats.clone()),
            Arc::new(lock.clone()),
            None,
        );

        Self {
            agents,
            heartbeats,
            lock,
            monitor,
            now: Utc::now(),
        }
    }

    /// 指定状态的Agent，`heartbeat_age_ms` 为 `None` 时没有心跳记录
    fn agent(&self, status: AgentStatus, node_id: Option<i64>, heartbeat_age_ms: Option<i64>) -> Agent {
        let mut builder = AgentBuilder::new();
        if let Some(node_id) = node_id {
            builder = builder.with_node(node_id);
        }
        let agent = self.agents.insert_agent(builder.build(), status);
        if let Some(age) = heartbeat_age_ms {
            self.heartbeats
                .put(agent.id, &agent.project_id, self.now.timestamp_millis() - age);
        }
        agent
    }

    fn status_of(&self, agent: &Agent) -> Option<AgentStatus> {
        self.agents.agent(agent.id, &agent.project_id).map(|a| a.status)
    }

    async fn run(&self) -> HeartbeatCheckReport {
        match self.monitor.run_once(self.now).await {
            MonitorOutcome::Completed(report) => report,
            MonitorOutcome::Skipped => panic!("心跳检查被跳过"),
        }
    }
}

#[tokio::test]
async fn test_stale_ok_agent_with_live_node_marks_node_abnormal() {
    let fx = Fixture::new();
    let node = fx.agents.insert_node("test-project", NodeStatus::Normal);
    let agent = fx.agent(AgentStatus::ImportOk, Some(node.id), Some(OK_THRESHOLD_MS + 1));

    let report = fx.run().await;

    assert_eq!(report.marked_exception, 1);
    assert_eq!(report.nodes_marked_abnormal, 1);
    assert_eq!(report.agents_deleted, 0);
    assert_eq!(fx.status_of(&agent), Some(AgentStatus::ImportException));
    assert_eq!(fx.agents.node(node.id).unwrap().node_status, NodeStatus::Abnormal);

    let actions = fx.agents.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, AgentAction::Offline);
}

#[tokio::test]
async fn test_stale_ok_agent_with_deleted_or_missing_node_is_deleted() {
    let fx = Fixture::new();
    let deleted = fx.agents.insert_node("test-project", NodeStatus::Deleted);
    let with_deleted_node = fx.agent(AgentStatus::ImportOk, Some(deleted.id), Some(OK_THRESHOLD_MS + 1));
    let with_missing_node = fx.agent(AgentStatus::ImportOk, Some(9_999), Some(OK_THRESHOLD_MS + 1));

    let report = fx.run().await;

    assert_eq!(report.marked_exception, 2);
    assert_eq!(report.agents_deleted, 2);
    assert_eq!(report.nodes_marked_abnormal, 0);
    assert_eq!(fx.status_of(&with_deleted_node), None);
    assert_eq!(fx.status_of(&with_missing_node), None);
    // 删除的Agent仍保留下线审计记录
    assert_eq!(fx.agents.actions().len(), 2);
    assert_eq!(fx.agents.node(deleted.id).unwrap().node_status, NodeStatus::Deleted);
}

#[tokio::test]
async fn test_ok_agent_within_threshold_or_without_heartbeat_is_untouched() {
    let fx = Fixture::new();
    let node = fx.agents.insert_node("test-project", NodeStatus::Normal);
    let fresh = fx.agent(AgentStatus::ImportOk, Some(node.id), Some(OK_THRESHOLD_MS));
    let silent = fx.agent(AgentStatus::ImportOk, Some(node.id), None);

    let report = fx.run().await;

    assert_eq!(report, HeartbeatCheckReport::default());
    assert_eq!(fx.status_of(&fresh), Some(AgentStatus::ImportOk));
    assert_eq!(fx.status_of(&silent), Some(AgentStatus::ImportOk));
    assert_eq!(fx.agents.write_count(), 0);
}

#[tokio::test]
async fn test_exception_sweep_deletes_agents_whose_node_is_gone() {
    let fx = Fixture::new();
    let live = fx.agents.insert_node("test-project", NodeStatus::Abnormal);
    let deleted = fx.agents.insert_node("test-project", NodeStatus::Deleted);
    let other_project = fx.agents.insert_node("other-project", NodeStatus::Normal);

    let kept = fx.agent(AgentStatus::ImportException, Some(live.id), None);
    let on_deleted = fx.agent(AgentStatus::ImportException, Some(deleted.id), None);
    let on_foreign = fx.agent(AgentStatus::ImportException, Some(other_project.id), None);
    let unbound = fx.agent(AgentStatus::ImportException, None, None);

    let report = fx.run().await;

    assert_eq!(report.agents_deleted, 3);
    assert_eq!(fx.status_of(&kept), Some(AgentStatus::ImportException));
    assert_eq!(fx.status_of(&on_deleted), None);
    assert_eq!(fx.status_of(&on_foreign), None);
    assert_eq!(fx.status_of(&unbound), None);

    // 再次执行不会重复删除
    assert_eq!(fx.run().await.agents_deleted, 0);
}

#[tokio::test]
async fn test_stale_unimport_agent_reverts() {
    let fx = Fixture::new();
    let stale = fx.agent(AgentStatus::UnImportOk, None, Some(UNIMPORT_THRESHOLD_MS + 1));
    let fresh = fx.agent(AgentStatus::UnImportOk, None, Some(UNIMPORT_THRESHOLD_MS - 1));
    let silent = fx.agent(AgentStatus::UnImportOk, None, None);

    let report = fx.run().await;

    assert_eq!(report.agents_reverted, 1);
    assert_eq!(fx.status_of(&stale), Some(AgentStatus::UnImport));
    assert_eq!(fx.status_of(&fresh), Some(AgentStatus::UnImportOk));
    assert_eq!(fx.status_of(&silent), Some(AgentStatus::UnImportOk));
}

/// 读取心跳时模拟Agent同时完成了导入
struct ImportingHeartbeatStore {
    inner: MockHeartbeatStore,
    agents: MockAgentRepository,
}

#[async_trait]
impl HeartbeatStore for ImportingHeartbeatStore {
    async fn get_heartbeat(&self, agent_id: i64, project_id: &str) -> SchedulerResult<Option<i64>> {
        self.agents
            .update_status(agent_id, project_id, AgentStatus::ImportOk, None)
            .await?;
        self.inner.get_heartbeat(agent_id, project_id).await
    }

    async fn set_heartbeat(
        &self,
        agent_id: i64,
        project_id: &str,
        timestamp_ms: i64,
        ttl: Duration,
    ) -> SchedulerResult<()> {
        self.inner
            .set_heartbeat(agent_id, project_id, timestamp_ms, ttl)
            .await
    }
}

#[tokio::test]
async fn test_unimport_reversion_loses_to_concurrent_import() {
    let agents = MockAgentRepository::new();
    let heartbeats = MockHeartbeatStore::new();
    let lock = MockDistributedLock::default();
    let now = Utc::now();

    let agent = agents.insert_agent(AgentBuilder::new().build(), AgentStatus::UnImportOk);
    heartbeats.put(
        agent.id,
        &agent.project_id,
        now.timestamp_millis() - UNIMPORT_THRESHOLD_MS - 1,
    );

    let monitor = AgentHeartbeatMonitor::new(
        Arc::new(agents.clone()),
        Arc::new(agents.clone()),
        Arc::new(ImportingHeartbeatStore {
            inner: heartbeats,
            agents: agents.clone(),
        }),
        Arc::new(lock),
        None,
    );

    let MonitorOutcome::Completed(report) = monitor.run_once(now).await else {
        panic!("心跳检查被跳过");
    };

    assert_eq!(report.agents_reverted, 0);
    assert_eq!(
        agents.agent(agent.id, &agent.project_id).unwrap().status,
        AgentStatus::ImportOk
    );
}

#[tokio::test]
async fn test_held_lock_skips_run_without_writes() {
    let fx = Fixture::new();
    fx.agent(AgentStatus::ImportOk, None, Some(OK_THRESHOLD_MS + 1));
    fx.agent(AgentStatus::UnImportOk, None, Some(UNIMPORT_THRESHOLD_MS + 1));
    fx.agent(AgentStatus::ImportException, None, None);

    for behavior in [LockBehavior::Held, LockBehavior::Unavailable] {
        fx.lock.set_behavior(behavior);
        assert_eq!(fx.monitor.run_once(fx.now).await, MonitorOutcome::Skipped);
    }

    assert_eq!(fx.agents.write_count(), 0);
    assert!(fx.agents.actions().is_empty());
    assert_eq!(fx.lock.released_count(), 0);
}

#[tokio::test]
async fn test_concurrent_monitor_is_skipped_while_lock_is_held() {
    let fx = Fixture::new();
    fx.agent(AgentStatus::ImportOk, None, Some(OK_THRESHOLD_MS + 1));

    // 另一个实例正在执行
    assert!(fx
        .lock
        .try_acquire(HEARTBEAT_CHECK_LOCK_KEY, Duration::from_secs(60))
        .await
        .unwrap());
    assert_eq!(fx.monitor.run_once(fx.now).await, MonitorOutcome::Skipped);
    assert_eq!(fx.agents.write_count(), 0);
}

#[tokio::test]
async fn test_lock_released_after_run() {
    let fx = Fixture::new();
    fx.agent(AgentStatus::ImportOk, None, Some(OK_THRESHOLD_MS + 1));

    fx.run().await;

    assert_eq!(fx.lock.acquired_count(), 1);
    assert_eq!(fx.lock.released_count(), 1);
    assert!(!fx.lock.is_held(HEARTBEAT_CHECK_LOCK_KEY));

    // 下一轮可以重新获取锁
    fx.run().await;
    assert_eq!(fx.lock.acquired_count(), 2);
}

#[tokio::test]
async fn test_agent_failures_are_isolated() {
    let fx = Fixture::new();
    let node = fx.agents.insert_node("test-project", NodeStatus::Normal);
    let broken = fx.agent(AgentStatus::ImportOk, Some(node.id), Some(OK_THRESHOLD_MS + 1));
    let unreadable = fx.agent(AgentStatus::ImportOk, Some(node.id), Some(OK_THRESHOLD_MS + 1));
    let healthy = fx.agent(AgentStatus::ImportOk, Some(node.id), Some(OK_THRESHOLD_MS + 1));
    let unimport = fx.agent(AgentStatus::UnImportOk, None, Some(UNIMPORT_THRESHOLD_MS + 1));

    fx.agents.fail_agent(broken.id);
    fx.heartbeats.fail_agent(unreadable.id);

    let report = fx.run().await;

    assert_eq!(report.agent_errors, 2);
    assert_eq!(report.marked_exception, 1);
    assert_eq!(report.agents_reverted, 1);
    assert_eq!(report.failed_passes, 0);
    assert_eq!(fx.status_of(&broken), Some(AgentStatus::ImportOk));
    assert_eq!(fx.status_of(&unreadable), Some(AgentStatus::ImportOk));
    assert_eq!(fx.status_of(&healthy), Some(AgentStatus::ImportException));
    assert_eq!(fx.status_of(&unimport), Some(AgentStatus::UnImport));
    assert_eq!(fx.lock.released_count(), 1);
}

#[tokio::test]
async fn test_record_heartbeat_promotes_unimport_agent() {
    let fx = Fixture::new();
    let agent = fx.agent(AgentStatus::UnImport, None, None);

    fx.monitor.record_heartbeat(&agent, fx.now).await.unwrap();

    assert_eq!(fx.status_of(&agent), Some(AgentStatus::UnImportOk));
    assert_eq!(
        fx.heartbeats
            .get_heartbeat(agent.id, &agent.project_id)
            .await
            .unwrap(),
        Some(fx.now.timestamp_millis())
    );

    // 已导入的Agent只刷新心跳
    let imported = fx.agent(AgentStatus::ImportOk, None, None);
    fx.monitor.record_heartbeat(&imported, fx.now).await.unwrap();
    assert_eq!(fx.status_of(&imported), Some(AgentStatus::ImportOk));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_loop_runs_after_initial_delay_until_shutdown() {
    let lock = MockDistributedLock::default();
    let agents = MockAgentRepository::new();
    let config = AgentHeartbeatMonitorConfig {
        initial_delay: Duration::from_secs(5),
        check_interval: Duration::from_secs(3),
        ..AgentHeartbeatMonitorConfig::default()
    };
    let monitor = Arc::new(AgentHeartbeatMonitor::new(
        Arc::new(agents.clone()),
        Arc::new(agents),
        Arc::new(MockHeartbeatStore::new()),
        Arc::new(lock.clone()),
        Some(config),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(lock.acquired_count(), 0);

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(lock.acquired_count(), 2);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}
