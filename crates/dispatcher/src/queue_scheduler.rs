use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use dispatch_core::{
    config::DispatchConfig,
    models::{
        BuildTask, BuildTaskKey, HostTagCondition, NewBuildTask, PipelineTaskStatus,
        QueueTaskFilter, TaskPredicate, TaskUpdate, ZoneCondition,
    },
    traits::{BuildTaskRepository, SecretCipher},
    SchedulerResult,
};

/// 一次回收扫描的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclamationReport {
    /// 释放了构建机标识的任务数
    pub host_tags_reclaimed: u64,
    /// 改投默认机房的任务数
    pub zones_reclaimed: u64,
    /// 因全局超时被置为失败的任务数
    pub tasks_timed_out: u64,
    /// 执行失败的扫描数
    pub failed_passes: u32,
}

impl ReclamationReport {
    pub fn total(&self) -> u64 {
        self.host_tags_reclaimed + self.zones_reclaimed + self.tasks_timed_out
    }
}

/// 构建任务队列调度
///
/// 构建机轮询排队任务并认领，调度服务周期性地回收长时间无人处理的认领和机房限制，
/// 避免任务饿死。所有状态变更都是带旧状态谓词的条件更新，返回受影响行数，
/// 返回 `0` 表示任务已不存在或已被其他实例修改。
pub struct DispatchQueueScheduler {
    task_repo: Arc<dyn BuildTaskRepository>,
    cipher: Arc<dyn SecretCipher>,
    config: DispatchConfig,
}

impl DispatchQueueScheduler {
    pub fn new(
        task_repo: Arc<dyn BuildTaskRepository>,
        cipher: Arc<dyn SecretCipher>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            task_repo,
            cipher,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// 提交构建任务，`secret_key` 加密后落库
    ///
    /// 同一 `(build_id, vm_seq_id)` 重复提交会覆盖原记录。
    #[instrument(skip(self, task), fields(build_id = %task.build_id, vm_seq_id = task.vm_seq_id))]
    pub async fn submit(&self, task: NewBuildTask) -> SchedulerResult<BuildTask> {
        task.validate()?;

        let mut task = task;
        task.secret_key = self.cipher.encrypt(&task.secret_key)?;

        let stored = self.task_repo.upsert(&task).await?;
        info!(
            "提交构建任务 {} 成功, 状态: {}, 机房: {:?}",
            stored.key(),
            stored.status,
            stored.zone
        );
        Ok(stored)
    }

    pub async fn get_task(&self, build_id: &str, vm_seq_id: i32) -> SchedulerResult<Option<BuildTask>> {
        self.task_repo
            .get(&BuildTaskKey::new(build_id, vm_seq_id))
            .await
    }

    pub async fn list_tasks(&self, build_id: &str) -> SchedulerResult<Vec<BuildTask>> {
        self.task_repo.list_by_build(build_id).await
    }

    /// 查询构建机可以承接的排队任务，按 `updated_time` 从旧到新
    pub async fn list_queue_tasks(&self, filter: &QueueTaskFilter) -> SchedulerResult<Vec<BuildTask>> {
        let tasks = self
            .task_repo
            .find(&filter.to_predicate(), filter.limit)
            .await?;
        debug!("查询到 {} 个排队任务, 条件: {:?}", tasks.len(), filter.capability);
        Ok(tasks)
    }

    /// 认领排队任务
    ///
    /// 以查询时看到的构建机标识为条件，把标识写成 `host_tag` 并刷新 `updated_time`。
    /// 并发认领同一任务时只有一个会成功，其余返回 `false`，调用方重新轮询即可。
    #[instrument(skip(self, task), fields(build_id = %task.build_id, vm_seq_id = task.vm_seq_id))]
    pub async fn claim(&self, task: &BuildTask, host_tag: &str) -> SchedulerResult<bool> {
        if host_tag.is_empty() {
            warn!("构建机标识为空，拒绝认领任务 {}", task.key());
            return Ok(false);
        }
        if task.is_claimed() && task.host_tag != host_tag {
            debug!("任务 {} 已被 {} 认领", task.key(), task.host_tag);
            counter!("dispatch_claims_total", "result" => "lost").increment(1);
            return Ok(false);
        }

        let observed = if task.is_claimed() {
            HostTagCondition::Equals(task.host_tag.clone())
        } else {
            HostTagCondition::Empty
        };
        let predicate = TaskPredicate::for_key(task.key())
            .with_statuses(&[PipelineTaskStatus::Queue])
            .with_host_tag(observed);
        let update = TaskUpdate {
            host_tag: Some(host_tag.to_string()),
            touch: true,
            ..Default::default()
        };

        let won = self.task_repo.update_where(&predicate, &update).await? == 1;
        if won {
            info!("构建机 {} 认领任务 {}", host_tag, task.key());
            counter!("dispatch_claims_total", "result" => "won").increment(1);
        } else {
            debug!("构建机 {} 认领任务 {} 失败，已被其他实例抢先", host_tag, task.key());
            counter!("dispatch_claims_total", "result" => "lost").increment(1);
        }
        Ok(won)
    }

    pub async fn mark_running(&self, build_id: &str, vm_seq_id: i32) -> SchedulerResult<u64> {
        self.transition(BuildTaskKey::new(build_id, vm_seq_id), PipelineTaskStatus::Running)
            .await
    }

    pub async fn mark_done(&self, build_id: &str, vm_seq_id: i32) -> SchedulerResult<u64> {
        self.transition(BuildTaskKey::new(build_id, vm_seq_id), PipelineTaskStatus::Done)
            .await
    }

    pub async fn mark_failure(&self, build_id: &str, vm_seq_id: i32) -> SchedulerResult<u64> {
        self.transition(BuildTaskKey::new(build_id, vm_seq_id), PipelineTaskStatus::Failure)
            .await
    }

    /// 记录容器ID，`host_tag` 非空时同时写入构建机标识
    #[instrument(skip(self))]
    pub async fn update_container_id(
        &self,
        build_id: &str,
        vm_seq_id: i32,
        container_id: &str,
        host_tag: Option<&str>,
    ) -> SchedulerResult<u64> {
        let predicate = TaskPredicate::for_key(BuildTaskKey::new(build_id, vm_seq_id))
            .with_statuses(&[PipelineTaskStatus::Queue, PipelineTaskStatus::Running]);

        let mut update = TaskUpdate::container(container_id);
        if let Some(tag) = host_tag.filter(|t| !t.is_empty()) {
            update = update.with_host_tag(tag);
        }

        let affected = self.task_repo.update_where(&predicate, &update).await?;
        if affected == 0 {
            debug!("任务 {}/{} 不存在或已结束，未更新容器ID", build_id, vm_seq_id);
        }
        Ok(affected)
    }

    /// 构建机上已结束（成功或失败）的任务，用于清理容器
    pub async fn list_finished_tasks(&self, host_tag: &str) -> SchedulerResult<Vec<BuildTask>> {
        let predicate = TaskPredicate::new()
            .with_statuses(&[PipelineTaskStatus::Done, PipelineTaskStatus::Failure])
            .with_host_tag(HostTagCondition::Equals(host_tag.to_string()));
        self.task_repo.find(&predicate, None).await
    }

    pub async fn delete_task(&self, build_id: &str, vm_seq_id: i32) -> SchedulerResult<u64> {
        self.task_repo
            .delete(&BuildTaskKey::new(build_id, vm_seq_id))
            .await
    }

    /// 解密任务的 `secret_key`
    pub fn reveal_secret(&self, task: &BuildTask) -> SchedulerResult<String> {
        self.cipher.decrypt(&task.secret_key)
    }

    async fn transition(&self, key: BuildTaskKey, target: PipelineTaskStatus) -> SchedulerResult<u64> {
        let predicate = TaskPredicate::for_key(key.clone())
            .with_statuses(PipelineTaskStatus::allowed_predecessors(target));

        let affected = self
            .task_repo
            .update_where(&predicate, &TaskUpdate::status(target))
            .await?;

        if affected == 0 {
            debug!("任务 {} 不存在或状态已变化，未流转到 {}", key, target);
        } else {
            info!("任务 {} 状态更新为 {}", key, target);
        }
        Ok(affected)
    }

    /// 释放排队超过阈值仍未启动的认领
    pub async fn reclaim_host_tags(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let cutoff = now - Duration::seconds(self.config.host_tag_reclaim_seconds);
        let predicate = TaskPredicate::new()
            .with_statuses(&[PipelineTaskStatus::Queue])
            .with_host_tag(HostTagCondition::NotEmpty)
            .updated_before(cutoff);

        let reclaimed = self
            .task_repo
            .update_where(&predicate, &TaskUpdate::clear_host_tag())
            .await?;
        if reclaimed > 0 {
            warn!("释放了 {} 个超过 {}s 未启动任务的构建机认领", reclaimed, self.config.host_tag_reclaim_seconds);
            counter!("dispatch_host_tags_reclaimed_total").increment(reclaimed);
        }
        Ok(reclaimed)
    }

    /// 将长时间无法调度的机房任务改投默认机房
    pub async fn reclaim_zones(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let cutoff = now - Duration::seconds(self.config.zone_reclaim_seconds);
        let default_zone = self.config.default_zone;
        let predicate = TaskPredicate::new()
            .with_statuses(&[PipelineTaskStatus::Queue])
            .with_zone(ZoneCondition::SetExcept(default_zone))
            .updated_before(cutoff);

        let reclaimed = self
            .task_repo
            .update_where(&predicate, &TaskUpdate::reset_zone(Some(default_zone)))
            .await?;
        if reclaimed > 0 {
            warn!("{} 个任务排队超过 {}s，改投机房 {}", reclaimed, self.config.zone_reclaim_seconds, default_zone);
            counter!("dispatch_zones_reclaimed_total").increment(reclaimed);
        }
        Ok(reclaimed)
    }

    /// 超过全局超时的任务强制置为失败
    pub async fn fail_timed_out(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let cutoff = now - Duration::seconds(self.config.task_timeout_seconds);
        let predicate = TaskPredicate::new()
            .without_status(PipelineTaskStatus::Failure)
            .updated_before(cutoff);

        let failed = self
            .task_repo
            .update_where(&predicate, &TaskUpdate::status(PipelineTaskStatus::Failure))
            .await?;
        if failed > 0 {
            warn!("{} 个任务超过全局超时，已置为失败", failed);
            counter!("dispatch_tasks_timed_out_total").increment(failed);
        }
        Ok(failed)
    }

    /// 依次执行三种回收扫描，单个扫描失败不影响其他扫描
    pub async fn run_reclamation(&self, now: DateTime<Utc>) -> ReclamationReport {
        let mut report = ReclamationReport::default();

        match self.reclaim_host_tags(now).await {
            Ok(count) => report.host_tags_reclaimed = count,
            Err(e) => {
                error!("释放构建机认领失败: {}", e);
                report.failed_passes += 1;
            }
        }

        match self.reclaim_zones(now).await {
            Ok(count) => report.zones_reclaimed = count,
            Err(e) => {
                error!("机房回收失败: {}", e);
                report.failed_passes += 1;
            }
        }

        match self.fail_timed_out(now).await {
            Ok(count) => report.tasks_timed_out = count,
            Err(e) => {
                error!("处理超时任务失败: {}", e);
                report.failed_passes += 1;
            }
        }

        if report.total() > 0 {
            info!("回收扫描完成: {:?}", report);
        }
        report
    }
}
