use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// 容器构建任务
///
/// 每个 `(build_id, vm_seq_id)` 只对应一行记录。重复提交同一组合时覆盖原有记录，
/// 以支持流水线步骤重试。
///
/// # 字段说明
///
/// - `status`: 任务状态，只能向前流转（重试提交时允许回到 QUEUE）
/// - `zone`: 目标机房，`None` 表示不限制机房
/// - `host_tag`: 认领该任务的构建机标识，空串表示尚未被认领
/// - `secret_key`: 加密后的密钥，明文只在调度服务内解密
/// - `updated_time`: 回收与超时逻辑唯一依赖的时间戳
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildTask {
    pub id: i64,
    pub project_id: String,
    pub agent_id: String,
    pub pipeline_id: String,
    pub build_id: String,
    pub vm_seq_id: i32,
    pub status: PipelineTaskStatus,
    pub secret_key: String,
    pub image_name: String,
    pub channel_code: String,
    pub host_tag: String,
    pub container_id: Option<String>,
    pub zone: Option<Zone>,
    pub registry_user: Option<String>,
    pub registry_pwd: Option<String>,
    pub image_type: Option<String>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl BuildTask {
    pub fn key(&self) -> BuildTaskKey {
        BuildTaskKey::new(&self.build_id, self.vm_seq_id)
    }

    /// 是否已经被某台构建机认领
    pub fn is_claimed(&self) -> bool {
        !self.host_tag.is_empty()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "构建任务 {}/{} (项目: {})",
            self.build_id, self.vm_seq_id, self.project_id
        )
    }
}

/// 构建任务的唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildTaskKey {
    pub build_id: String,
    pub vm_seq_id: i32,
}

impl BuildTaskKey {
    pub fn new(build_id: impl Into<String>, vm_seq_id: i32) -> Self {
        Self {
            build_id: build_id.into(),
            vm_seq_id,
        }
    }
}

impl fmt::Display for BuildTaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.build_id, self.vm_seq_id)
    }
}

/// 提交（或重试提交）构建任务的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuildTask {
    pub project_id: String,
    pub agent_id: String,
    pub pipeline_id: String,
    pub build_id: String,
    pub vm_seq_id: i32,
    pub status: PipelineTaskStatus,
    pub secret_key: String,
    pub image_name: String,
    pub channel_code: String,
    pub host_tag: String,
    pub zone: Option<Zone>,
    pub registry_user: Option<String>,
    pub registry_pwd: Option<String>,
    pub image_type: Option<String>,
}

impl NewBuildTask {
    pub fn key(&self) -> BuildTaskKey {
        BuildTaskKey::new(&self.build_id, self.vm_seq_id)
    }

    pub fn validate(&self) -> crate::SchedulerResult<()> {
        if self.project_id.is_empty() {
            return Err(SchedulerError::InvalidTaskParams("project_id不能为空".to_string()));
        }
        if self.build_id.is_empty() {
            return Err(SchedulerError::InvalidTaskParams("build_id不能为空".to_string()));
        }
        if self.image_name.is_empty() {
            return Err(SchedulerError::InvalidTaskParams("image_name不能为空".to_string()));
        }
        Ok(())
    }
}

/// 构建任务状态
///
/// ```text
/// QUEUE → RUNNING → DONE
///   │        └────→ FAILURE
///   └──────────────→ FAILURE
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PipelineTaskStatus {
    #[serde(rename = "QUEUE")]
    Queue,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl PipelineTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineTaskStatus::Queue => "QUEUE",
            PipelineTaskStatus::Running => "RUNNING",
            PipelineTaskStatus::Done => "DONE",
            PipelineTaskStatus::Failure => "FAILURE",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PipelineTaskStatus::Done | PipelineTaskStatus::Failure)
    }

    /// 可以合法流转到 `target` 的前置状态
    pub fn allowed_predecessors(target: PipelineTaskStatus) -> &'static [PipelineTaskStatus] {
        match target {
            PipelineTaskStatus::Queue => &[PipelineTaskStatus::Queue],
            PipelineTaskStatus::Running => &[PipelineTaskStatus::Queue],
            PipelineTaskStatus::Done | PipelineTaskStatus::Failure => {
                &[PipelineTaskStatus::Queue, PipelineTaskStatus::Running]
            }
        }
    }
}

impl fmt::Display for PipelineTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineTaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUE" => Ok(PipelineTaskStatus::Queue),
            "RUNNING" => Ok(PipelineTaskStatus::Running),
            "DONE" => Ok(PipelineTaskStatus::Done),
            "FAILURE" => Ok(PipelineTaskStatus::Failure),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid task status: {s}"
            ))),
        }
    }
}

/// 机房
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    #[serde(rename = "SHENZHEN")]
    Shenzhen,
    #[serde(rename = "SHANGHAI")]
    Shanghai,
    #[serde(rename = "TIANJIN")]
    Tianjin,
    #[serde(rename = "GUANGZHOU")]
    Guangzhou,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::Shenzhen, Zone::Shanghai, Zone::Tianjin, Zone::Guangzhou];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Shenzhen => "SHENZHEN",
            Zone::Shanghai => "SHANGHAI",
            Zone::Tianjin => "TIANJIN",
            Zone::Guangzhou => "GUANGZHOU",
        }
    }

    /// 将数据库中的机房字段解析为 `Option<Zone>`，空串表示不限制机房
    pub fn parse_optional(value: Option<&str>) -> crate::SchedulerResult<Option<Zone>> {
        match value {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    pub fn column_value(zone: Option<Zone>) -> &'static str {
        zone.map(|z| z.as_str()).unwrap_or("")
    }
}

impl Default for Zone {
    fn default() -> Self {
        Zone::Shenzhen
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHENZHEN" => Ok(Zone::Shenzhen),
            "SHANGHAI" => Ok(Zone::Shanghai),
            "TIANJIN" => Ok(Zone::Tianjin),
            "GUANGZHOU" => Ok(Zone::Guangzhou),
            _ => Err(SchedulerError::Serialization(format!("Invalid zone: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        for status in [
            PipelineTaskStatus::Queue,
            PipelineTaskStatus::Running,
            PipelineTaskStatus::Done,
            PipelineTaskStatus::Failure,
        ] {
            assert_eq!(status.as_str().parse::<PipelineTaskStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<PipelineTaskStatus>().is_err());
    }

    #[test]
    fn test_status_forward_only() {
        assert_eq!(
            PipelineTaskStatus::allowed_predecessors(PipelineTaskStatus::Running),
            &[PipelineTaskStatus::Queue]
        );
        assert!(!PipelineTaskStatus::allowed_predecessors(PipelineTaskStatus::Failure)
            .contains(&PipelineTaskStatus::Done));
        assert!(PipelineTaskStatus::Done.is_finished());
        assert!(!PipelineTaskStatus::Running.is_finished());
    }

    #[test]
    fn test_zone_optional_column() {
        assert_eq!(Zone::parse_optional(None).unwrap(), None);
        assert_eq!(Zone::parse_optional(Some("")).unwrap(), None);
        assert_eq!(
            Zone::parse_optional(Some("shanghai")).unwrap(),
            Some(Zone::Shanghai)
        );
        assert!(Zone::parse_optional(Some("MARS")).is_err());
        assert_eq!(Zone::column_value(None), "");
        assert_eq!(Zone::default(), Zone::Shenzhen);
    }
}
