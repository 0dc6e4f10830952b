//! 构建任务的查询/更新谓词
//!
//! 存储层不感知调度语义，只接收这里定义的谓词对象：
//! 状态集合、机房条件、构建机标识条件、项目范围、`updated_time` 截止时间以及可选的主键。
//! SQL实现把谓词翻译成 `WHERE` 子句，内存实现直接调用 [`TaskPredicate::matches`]。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::build_task::{BuildTask, BuildTaskKey, PipelineTaskStatus, Zone};

/// 构建机标识（host_tag）条件
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostTagCondition {
    #[default]
    Any,
    /// 未被认领
    Empty,
    /// 已被任意构建机认领
    NotEmpty,
    Equals(String),
}

impl HostTagCondition {
    pub fn matches(&self, host_tag: &str) -> bool {
        match self {
            HostTagCondition::Any => true,
            HostTagCondition::Empty => host_tag.is_empty(),
            HostTagCondition::NotEmpty => !host_tag.is_empty(),
            HostTagCondition::Equals(expected) => host_tag == expected,
        }
    }
}

/// 机房条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoneCondition {
    #[default]
    Any,
    /// 不限制机房
    Empty,
    Equals(Zone),
    /// 指定了机房，且不是给定的机房（用于回收时排除默认机房）
    SetExcept(Zone),
}

impl ZoneCondition {
    pub fn matches(&self, zone: Option<Zone>) -> bool {
        match self {
            ZoneCondition::Any => true,
            ZoneCondition::Empty => zone.is_none(),
            ZoneCondition::Equals(expected) => zone == Some(*expected),
            ZoneCondition::SetExcept(excluded) => matches!(zone, Some(z) if z != *excluded),
        }
    }
}

/// 项目范围，用于给特定项目划分专属资源池
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectScope {
    #[default]
    All,
    /// 只包含这些项目；空集合不匹配任何任务
    Include(BTreeSet<String>),
    /// 排除这些项目；空集合等价于 `All`
    Exclude(BTreeSet<String>),
}

impl ProjectScope {
    pub fn include<I, S>(projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProjectScope::Include(projects.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProjectScope::Exclude(projects.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, project_id: &str) -> bool {
        match self {
            ProjectScope::All => true,
            ProjectScope::Include(set) => set.contains(project_id),
            ProjectScope::Exclude(set) => !set.contains(project_id),
        }
    }
}

/// 构建任务谓词
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskPredicate {
    pub key: Option<BuildTaskKey>,
    /// 空集合表示不限制状态
    pub statuses: Vec<PipelineTaskStatus>,
    pub excluded_statuses: Vec<PipelineTaskStatus>,
    pub host_tag: HostTagCondition,
    pub zone: ZoneCondition,
    pub projects: ProjectScope,
    /// `updated_time <= updated_before`
    pub updated_before: Option<DateTime<Utc>>,
}

impl TaskPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_key(key: BuildTaskKey) -> Self {
        Self {
            key: Some(key),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[PipelineTaskStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn without_status(mut self, status: PipelineTaskStatus) -> Self {
        self.excluded_statuses.push(status);
        self
    }

    pub fn with_host_tag(mut self, condition: HostTagCondition) -> Self {
        self.host_tag = condition;
        self
    }

    pub fn with_zone(mut self, condition: ZoneCondition) -> Self {
        self.zone = condition;
        self
    }

    pub fn with_projects(mut self, projects: ProjectScope) -> Self {
        self.projects = projects;
        self
    }

    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn matches(&self, task: &BuildTask) -> bool {
        if let Some(key) = &self.key {
            if task.build_id != key.build_id || task.vm_seq_id != key.vm_seq_id {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if self.excluded_statuses.contains(&task.status) {
            return false;
        }
        if let Some(cutoff) = self.updated_before {
            if task.updated_time > cutoff {
                return false;
            }
        }
        self.host_tag.matches(&task.host_tag)
            && self.zone.matches(task.zone)
            && self.projects.matches(&task.project_id)
    }
}

/// 构建机可以承接的队列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueCapability {
    /// 既没有机房要求也没有被认领的公共队列
    Unconstrained,
    /// 指定机房、尚未被认领的任务
    Zone(Zone),
    /// 已分配给指定构建机的任务
    HostTag(String),
}

/// 排队任务查询条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTaskFilter {
    pub capability: QueueCapability,
    pub projects: ProjectScope,
    pub limit: Option<i64>,
}

impl QueueTaskFilter {
    pub fn new(capability: QueueCapability, projects: ProjectScope) -> Self {
        Self {
            capability,
            projects,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_predicate(&self) -> TaskPredicate {
        let predicate = TaskPredicate::new()
            .with_statuses(&[PipelineTaskStatus::Queue])
            .with_projects(self.projects.clone());

        match &self.capability {
            QueueCapability::Unconstrained => predicate
                .with_host_tag(HostTagCondition::Empty)
                .with_zone(ZoneCondition::Empty),
            QueueCapability::Zone(zone) => predicate
                .with_host_tag(HostTagCondition::Empty)
                .with_zone(ZoneCondition::Equals(*zone)),
            QueueCapability::HostTag(tag) => {
                predicate.with_host_tag(HostTagCondition::Equals(tag.clone()))
            }
        }
    }
}

/// 条件更新要写入的字段，`None` 表示不修改
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskUpdate {
    pub status: Option<PipelineTaskStatus>,
    pub host_tag: Option<String>,
    pub zone: Option<Option<Zone>>,
    pub container_id: Option<String>,
    /// 是否刷新 `updated_time`
    pub touch: bool,
}

impl TaskUpdate {
    pub fn status(status: PipelineTaskStatus) -> Self {
        Self {
            status: Some(status),
            touch: true,
            ..Default::default()
        }
    }

    pub fn with_host_tag(mut self, host_tag: impl Into<String>) -> Self {
        self.host_tag = Some(host_tag.into());
        self
    }

    /// 释放构建机认领，不刷新 `updated_time`
    pub fn clear_host_tag() -> Self {
        Self {
            host_tag: Some(String::new()),
            ..Default::default()
        }
    }

    /// 改投机房，不刷新 `updated_time`
    pub fn reset_zone(zone: Option<Zone>) -> Self {
        Self {
            zone: Some(zone),
            ..Default::default()
        }
    }

    pub fn container(container_id: impl Into<String>) -> Self {
        Self {
            container_id: Some(container_id.into()),
            touch: true,
            ..Default::default()
        }
    }

    pub fn without_touch(mut self) -> Self {
        self.touch = false;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.host_tag.is_none()
            && self.zone.is_none()
            && self.container_id.is_none()
            && !self.touch
    }

    /// 将更新应用到内存中的任务上
    pub fn apply_to(&self, task: &mut BuildTask, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(host_tag) = &self.host_tag {
            task.host_tag = host_tag.clone();
        }
        if let Some(zone) = self.zone {
            task.zone = zone;
        }
        if let Some(container_id) = &self.container_id {
            task.container_id = Some(container_id.clone());
        }
        if self.touch {
            task.updated_time = now;
        }
    }
}
