use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("构建任务未找到: {build_id}/{vm_seq_id}")]
    TaskNotFound { build_id: String, vm_seq_id: i32 },

    #[error("Agent未找到: {project_id}/{id}")]
    AgentNotFound { project_id: String, id: i64 },

    #[error("Redis错误: {0}")]
    Redis(String),

    #[error("加解密错误: {0}")]
    Crypto(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn timeout_error(message: impl Into<String>) -> Self {
        SchedulerError::Timeout(message.into())
    }

    pub fn redis_error(err: impl std::fmt::Display) -> Self {
        SchedulerError::Redis(err.to_string())
    }

    /// 是否为可以直接重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Timeout(_) | SchedulerError::Redis(_) | SchedulerError::Database(_)
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SchedulerError::TaskNotFound {
            build_id: "b-1".to_string(),
            vm_seq_id: 2,
        };
        assert_eq!(err.to_string(), "构建任务未找到: b-1/2");

        let err = SchedulerError::timeout_error("查询超时");
        assert!(err.to_string().contains("超时"));
        assert!(err.is_transient());
        assert!(!SchedulerError::Crypto("bad".to_string()).is_transient());
    }
}
