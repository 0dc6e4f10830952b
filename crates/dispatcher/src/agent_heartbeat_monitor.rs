use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use dispatch_core::{
    config::HeartbeatConfig,
    models::{Agent, AgentStatus, OfflineOutcome},
    traits::{AgentRepository, DistributedLock, HeartbeatStore, NodeRepository},
    SchedulerResult,
};

/// 心跳检查的单实例锁名称
pub const HEARTBEAT_CHECK_LOCK_KEY: &str = "env_cron_agent_heartbeat_check";

/// Agent心跳监控配置
#[derive(Debug, Clone)]
pub struct AgentHeartbeatMonitorConfig {
    /// Agent上报心跳的间隔
    pub heartbeat_interval: Duration,
    /// 已导入Agent的超时倍数
    pub ok_agent_multiplier: u32,
    /// 未导入Agent的超时倍数
    pub unimport_multiplier: u32,
    pub check_interval: Duration,
    pub initial_delay: Duration,
    pub lock_ttl: Duration,
    pub lock_key: String,
    /// 心跳记录的过期时间
    pub record_ttl: Duration,
}

impl Default for AgentHeartbeatMonitorConfig {
    fn default() -> Self {
        Self::from(&HeartbeatConfig::default())
    }
}

impl From<&HeartbeatConfig> for AgentHeartbeatMonitorConfig {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.interval_seconds),
            ok_agent_multiplier: config.ok_agent_multiplier,
            unimport_multiplier: config.unimport_multiplier,
            check_interval: Duration::from_millis(config.check_interval_ms),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            lock_ttl: Duration::from_secs(config.lock_ttl_seconds),
            lock_key: config
                .lock_key
                .clone()
                .unwrap_or_else(|| HEARTBEAT_CHECK_LOCK_KEY.to_string()),
            record_ttl: Duration::from_secs(config.record_ttl_seconds),
        }
    }
}

impl AgentHeartbeatMonitorConfig {
    fn threshold_ms(&self, multiplier: u32) -> i64 {
        self.heartbeat_interval.as_millis() as i64 * i64::from(multiplier)
    }
}

/// 一次心跳检查的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatCheckReport {
    /// 标记为异常的Agent数
    pub marked_exception: u32,
    /// 标记为异常的节点数
    pub nodes_marked_abnormal: u32,
    /// 删除的Agent数（包括标记异常时直接删除的）
    pub agents_deleted: u32,
    /// 回退为未导入的Agent数
    pub agents_reverted: u32,
    /// 处理单个Agent时出错的次数
    pub agent_errors: u32,
    /// 整体执行失败的检查步骤数
    pub failed_passes: u32,
}

/// 心跳检查的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// 未获取到锁，本轮跳过
    Skipped,
    Completed(HeartbeatCheckReport),
}

/// 第三方构建机Agent心跳监控
///
/// 每轮检查先获取分布式锁，保证多实例部署时同一时刻只有一个实例执行。
/// 获取锁失败时本轮跳过，不做任何修改。获取成功后依次执行三个相互独立的检查：
///
/// 1. `IMPORT_OK` 的Agent超过 `ok_agent_multiplier` 个心跳间隔未上报，标记为异常；
///    节点不存在或已删除时直接删除Agent，否则将节点标记为 `ABNORMAL`
/// 2. `IMPORT_EXCEPTION` 的Agent，节点不存在或已删除时删除
/// 3. `UN_IMPORT_OK` 的Agent超过 `unimport_multiplier` 个心跳间隔未上报，回退为 `UN_IMPORT`
///
/// 没有心跳记录的Agent无法判断是否超时，直接跳过。
pub struct AgentHeartbeatMonitor {
    agent_repo: Arc<dyn AgentRepository>,
    node_repo: Arc<dyn NodeRepository>,
    heartbeats: Arc<dyn HeartbeatStore>,
    lock: Arc<dyn DistributedLock>,
    config: AgentHeartbeatMonitorConfig,
}

impl AgentHeartbeatMonitor {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        node_repo: Arc<dyn NodeRepository>,
        heartbeats: Arc<dyn HeartbeatStore>,
        lock: Arc<dyn DistributedLock>,
        config: Option<AgentHeartbeatMonitorConfig>,
    ) -> Self {
        Self {
            agent_repo,
            node_repo,
            heartbeats,
            lock,
            config: config.unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &AgentHeartbeatMonitorConfig {
        &self.config
    }

    /// 记录Agent心跳
    ///
    /// 写入当前时间，首次心跳时把 `UN_IMPORT` 的Agent推进到 `UN_IMPORT_OK`。
    #[instrument(skip(self, agent), fields(agent_id = agent.id, project_id = %agent.project_id))]
    pub async fn record_heartbeat(&self, agent: &Agent, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.heartbeats
            .set_heartbeat(
                agent.id,
                &agent.project_id,
                now.timestamp_millis(),
                self.config.record_ttl,
            )
            .await?;

        if agent.status == AgentStatus::UnImport {
            let promoted = self
                .agent_repo
                .update_status(
                    agent.id,
                    &agent.project_id,
                    AgentStatus::UnImportOk,
                    Some(AgentStatus::UnImport),
                )
                .await?;
            if promoted {
                info!("{} 收到首次心跳，状态更新为 UN_IMPORT_OK", agent.entity_description());
            }
        }
        Ok(())
    }

    /// 执行一轮心跳检查
    ///
    /// 不返回错误：锁获取失败视为跳过，检查中的错误只记录日志。
    pub async fn run_once(&self, now: DateTime<Utc>) -> MonitorOutcome {
        let lock_key = &self.config.lock_key;

        match self.lock.try_acquire(lock_key, self.config.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                info!("获取心跳检查锁失败，跳过本轮检查");
                counter!("agent_heartbeat_checks_total", "result" => "skipped").increment(1);
                return MonitorOutcome::Skipped;
            }
            Err(e) => {
                warn!("获取心跳检查锁出错，跳过本轮检查: {}", e);
                counter!("agent_heartbeat_checks_total", "result" => "skipped").increment(1);
                return MonitorOutcome::Skipped;
            }
        }

        let mut report = HeartbeatCheckReport::default();
        let now_ms = now.timestamp_millis();

        if let Err(e) = self.check_ok_agents(now_ms, &mut report).await {
            error!("检查已导入Agent心跳失败: {}", e);
            report.failed_passes += 1;
        }

        if let Err(e) = self.check_exception_agents(&mut report).await {
            error!("清理异常Agent失败: {}", e);
            report.failed_passes += 1;
        }

        if let Err(e) = self.check_unimport_agents(now_ms, &mut report).await {
            error!("检查未导入Agent心跳失败: {}", e);
            report.failed_passes += 1;
        }

        if let Err(e) = self.lock.release(lock_key).await {
            warn!("释放心跳检查锁失败，将等待锁过期: {}", e);
        }

        counter!("agent_heartbeat_checks_total", "result" => "completed").increment(1);
        counter!("agent_marked_exception_total").increment(u64::from(report.marked_exception));
        counter!("agent_deleted_total").increment(u64::from(report.agents_deleted));
        counter!("agent_reverted_total").increment(u64::from(report.agents_reverted));

        debug!("心跳检查完成: {:?}", report);
        MonitorOutcome::Completed(report)
    }

    /// 运行检查循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动Agent心跳监控, 首次延迟: {:?}, 间隔: {:?}",
            self.config.initial_delay, self.config.check_interval
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay) => {}
            _ = shutdown_rx.recv() => {
                info!("心跳监控收到关闭信号");
                return;
            }
        }

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once(Utc::now()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("心跳监控收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 距离上次心跳的毫秒数，没有心跳记录时返回 `None`
    async fn heartbeat_age(&self, agent: &Agent, now_ms: i64) -> SchedulerResult<Option<i64>> {
        let last = self
            .heartbeats
            .get_heartbeat(agent.id, &agent.project_id)
            .await?;
        Ok(last.map(|last_ms| now_ms - last_ms))
    }

    async fn check_ok_agents(&self, now_ms: i64, report: &mut HeartbeatCheckReport) -> SchedulerResult<()> {
        let agents = self.agent_repo.list_by_status(&[AgentStatus::ImportOk]).await?;
        let threshold = self.config.threshold_ms(self.config.ok_agent_multiplier);

        for agent in agents {
            if let Err(e) = self.check_ok_agent(&agent, now_ms, threshold, report).await {
                error!("处理 {} 时出错: {}", agent.entity_description(), e);
                report.agent_errors += 1;
            }
        }
        Ok(())
    }

    async fn check_ok_agent(
        &self,
        agent: &Agent,
        now_ms: i64,
        threshold: i64,
        report: &mut HeartbeatCheckReport,
    ) -> SchedulerResult<()> {
        let Some(age) = self.heartbeat_age(agent, now_ms).await? else {
            return Ok(());
        };
        if age <= threshold {
            return Ok(());
        }

        warn!(
            "{} 已有 {}ms 未收到心跳，标记为异常",
            agent.entity_description(),
            age
        );
        match self.agent_repo.mark_exception(agent).await? {
            OfflineOutcome::AgentDeleted => {
                info!("{} 所在节点已不存在，删除Agent", agent.entity_description());
                report.marked_exception += 1;
                report.agents_deleted += 1;
            }
            OfflineOutcome::NodeMarkedAbnormal => {
                report.marked_exception += 1;
                report.nodes_marked_abnormal += 1;
            }
            OfflineOutcome::Skipped => {
                debug!("{} 状态已变化，跳过", agent.entity_description());
            }
        }
        Ok(())
    }

    async fn check_exception_agents(&self, report: &mut HeartbeatCheckReport) -> SchedulerResult<()> {
        let agents = self
            .agent_repo
            .list_by_status(&[AgentStatus::ImportException])
            .await?;

        for agent in agents {
            match self.delete_if_node_gone(&agent).await {
                Ok(true) => report.agents_deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("清理 {} 时出错: {}", agent.entity_description(), e);
                    report.agent_errors += 1;
                }
            }
        }
        Ok(())
    }

    /// 节点不存在（包括未关联节点）或已删除时删除Agent
    async fn delete_if_node_gone(&self, agent: &Agent) -> SchedulerResult<bool> {
        let node = match agent.node_id {
            Some(node_id) => self.node_repo.get_node(&agent.project_id, node_id).await?,
            None => None,
        };
        if node.is_some_and(|n| !n.is_deleted()) {
            return Ok(false);
        }

        info!("尝试删除 {}，所在节点已不存在", agent.entity_description());
        self.agent_repo.delete(agent.id, &agent.project_id).await
    }

    async fn check_unimport_agents(&self, now_ms: i64, report: &mut HeartbeatCheckReport) -> SchedulerResult<()> {
        let agents = self
            .agent_repo
            .list_by_status(&[AgentStatus::UnImportOk])
            .await?;
        let threshold = self.config.threshold_ms(self.config.unimport_multiplier);

        for agent in agents {
            match self.revert_if_stale(&agent, now_ms, threshold).await {
                Ok(true) => report.agents_reverted += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("处理未导入的 {} 时出错: {}", agent.entity_description(), e);
                    report.agent_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn revert_if_stale(&self, agent: &Agent, now_ms: i64, threshold: i64) -> SchedulerResult<bool> {
        let Some(age) = self.heartbeat_age(agent, now_ms).await? else {
            return Ok(false);
        };
        if age <= threshold {
            return Ok(false);
        }

        warn!(
            "未导入的 {} 已有 {}ms 未收到心跳，回退为 UN_IMPORT",
            agent.entity_description(),
            age
        );
        self.agent_repo
            .update_status(
                agent.id,
                &agent.project_id,
                AgentStatus::UnImport,
                Some(AgentStatus::UnImportOk),
            )
            .await
    }
}
