use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// 第三方构建机Agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: i64,
    pub project_id: String,
    pub node_id: Option<i64>,
    pub status: AgentStatus,
    pub ip: String,
    pub hostname: String,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Agent {
    pub fn entity_description(&self) -> String {
        format!("Agent {} (项目: {})", self.id, self.project_id)
    }
}

/// Agent注册请求，注册后状态为 `UN_IMPORT`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub project_id: String,
    pub node_id: Option<i64>,
    pub ip: String,
    pub hostname: String,
}

/// Agent状态
///
/// ```text
/// UN_IMPORT → UN_IMPORT_OK → IMPORT_OK → IMPORT_EXCEPTION → (删除)
///                 │
///                 └─ 心跳超时 → UN_IMPORT
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    #[serde(rename = "UN_IMPORT")]
    UnImport,
    #[serde(rename = "UN_IMPORT_OK")]
    UnImportOk,
    #[serde(rename = "IMPORT_OK")]
    ImportOk,
    #[serde(rename = "IMPORT_EXCEPTION")]
    ImportException,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::UnImport => "UN_IMPORT",
            AgentStatus::UnImportOk => "UN_IMPORT_OK",
            AgentStatus::ImportOk => "IMPORT_OK",
            AgentStatus::ImportException => "IMPORT_EXCEPTION",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UN_IMPORT" => Ok(AgentStatus::UnImport),
            "UN_IMPORT_OK" => Ok(AgentStatus::UnImportOk),
            "IMPORT_OK" => Ok(AgentStatus::ImportOk),
            "IMPORT_EXCEPTION" => Ok(AgentStatus::ImportException),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid agent status: {s}"
            ))),
        }
    }
}

/// Agent审计动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentAction {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Online => "ONLINE",
            AgentAction::Offline => "OFFLINE",
        }
    }
}

impl FromStr for AgentAction {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(AgentAction::Online),
            "OFFLINE" => Ok(AgentAction::Offline),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid agent action: {s}"
            ))),
        }
    }
}

/// 审计日志记录（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentActionRecord {
    pub id: i64,
    pub project_id: String,
    pub agent_id: i64,
    pub action: AgentAction,
    pub action_time: DateTime<Utc>,
}

/// 基础设施节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i64,
    pub project_id: String,
    pub node_status: NodeStatus,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Node {
    pub fn is_deleted(&self) -> bool {
        self.node_status == NodeStatus::Deleted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub project_id: String,
    pub node_status: NodeStatus,
}

/// 节点状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Normal,
    Abnormal,
    Deleted,
    Lost,
    Creating,
    Running,
    Starting,
    Stopping,
    Stopped,
    Restarting,
    Deleting,
    BuildingImage,
    BuildImageSuccess,
    BuildImageFailed,
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Normal => "NORMAL",
            NodeStatus::Abnormal => "ABNORMAL",
            NodeStatus::Deleted => "DELETED",
            NodeStatus::Lost => "LOST",
            NodeStatus::Creating => "CREATING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Starting => "STARTING",
            NodeStatus::Stopping => "STOPPING",
            NodeStatus::Stopped => "STOPPED",
            NodeStatus::Restarting => "RESTARTING",
            NodeStatus::Deleting => "DELETING",
            NodeStatus::BuildingImage => "BUILDING_IMAGE",
            NodeStatus::BuildImageSuccess => "BUILD_IMAGE_SUCCESS",
            NodeStatus::BuildImageFailed => "BUILD_IMAGE_FAILED",
            NodeStatus::Unknown => "UNKNOWN",
        }
    }

    /// 无法识别的状态按 `UNKNOWN` 处理
    pub fn parse_by_name(name: &str) -> NodeStatus {
        match name {
            "NORMAL" => NodeStatus::Normal,
            "ABNORMAL" => NodeStatus::Abnormal,
            "DELETED" => NodeStatus::Deleted,
            "LOST" => NodeStatus::Lost,
            "CREATING" => NodeStatus::Creating,
            "RUNNING" => NodeStatus::Running,
            "STARTING" => NodeStatus::Starting,
            "STOPPING" => NodeStatus::Stopping,
            "STOPPED" => NodeStatus::Stopped,
            "RESTARTING" => NodeStatus::Restarting,
            "DELETING" => NodeStatus::Deleting,
            "BUILDING_IMAGE" => NodeStatus::BuildingImage,
            "BUILD_IMAGE_SUCCESS" => NodeStatus::BuildImageSuccess,
            "BUILD_IMAGE_FAILED" => NodeStatus::BuildImageFailed,
            _ => NodeStatus::Unknown,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 健康Agent心跳超时后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// 节点已删除或不存在，Agent随之删除
    AgentDeleted,
    /// 节点仍然存在，节点被标记为 ABNORMAL
    NodeMarkedAbnormal,
    /// Agent在写入时已不是 IMPORT_OK，未做任何修改
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_parse() {
        assert_eq!(
            "UN_IMPORT_OK".parse::<AgentStatus>().unwrap(),
            AgentStatus::UnImportOk
        );
        assert_eq!(AgentStatus::ImportException.to_string(), "IMPORT_EXCEPTION");
        assert!("OK".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_node_status_parse_by_name() {
        assert_eq!(NodeStatus::parse_by_name("DELETED"), NodeStatus::Deleted);
        assert_eq!(NodeStatus::parse_by_name("BUILD_IMAGE_FAILED"), NodeStatus::BuildImageFailed);
        assert_eq!(NodeStatus::parse_by_name("whatever"), NodeStatus::Unknown);
        for status in [NodeStatus::Normal, NodeStatus::Abnormal, NodeStatus::Lost] {
            assert_eq!(NodeStatus::parse_by_name(status.as_str()), status);
        }
    }

    #[test]
    fn test_node_is_deleted() {
        let now = Utc::now();
        let mut node = Node {
            id: 1,
            project_id: "p".to_string(),
            node_status: NodeStatus::Normal,
            created_time: now,
            updated_time: now,
        };
        assert!(!node.is_deleted());
        node.node_status = NodeStatus::Deleted;
        assert!(node.is_deleted());
    }
}
