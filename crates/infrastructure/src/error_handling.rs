//! 仓储操作的错误上下文
//!
//! 把 sqlx 错误转换成带有操作类型和实体描述的 [`SchedulerError`]，并记录结构化日志。

use std::fmt;

use dispatch_core::SchedulerError;
use sqlx::Error as SqlxError;
use tracing::{error, instrument};

/// 仓储操作类型
#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    BatchUpdate,
    Transaction,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::BatchUpdate => write!(f, "批量更新"),
            RepositoryOperation::Transaction => write!(f, "事务处理"),
        }
    }
}

/// 仓储操作上下文
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: RepositoryOperation,
    pub entity: String,
    pub additional_info: Option<String>,
}

impl OperationContext {
    pub fn new(operation: RepositoryOperation, entity: impl Into<String>) -> Self {
        Self {
            operation,
            entity: entity.into(),
            additional_info: None,
        }
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn describe(&self) -> String {
        match &self.additional_info {
            Some(info) => format!("{}{} ({})", self.operation, self.entity, info),
            None => format!("{}{}", self.operation, self.entity),
        }
    }
}

/// 仓储错误转换
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    #[instrument(skip_all, fields(operation = %context.operation, entity = %context.entity))]
    pub fn database_error(context: &OperationContext, error: SqlxError) -> SchedulerError {
        let desc = context.describe();

        let error_msg = match &error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some("uk_build_vm") => format!("{desc}时发生唯一约束冲突: 构建任务已存在"),
                Some(constraint) => format!("{desc}时发生数据库约束冲突: {constraint}"),
                None => format!("{desc}时发生数据库错误: {db_error}"),
            },
            SqlxError::PoolClosed => format!("{desc}时数据库连接池已关闭"),
            SqlxError::PoolTimedOut => format!("{desc}时数据库连接池超时"),
            SqlxError::Io(io_error) => format!("{desc}时发生I/O错误: {io_error}"),
            _ => format!("{desc}时发生未知数据库错误: {error}"),
        };

        error!(error = %error, "{}", error_msg);
        SchedulerError::DatabaseOperation(error_msg)
    }

    /// 数据库中的取值无法解析为领域类型
    pub fn mapping_error(context: &OperationContext, error: impl fmt::Display) -> SchedulerError {
        let error_msg = format!("{}时数据映射失败: {}", context.describe(), error);
        error!("{}", error_msg);
        SchedulerError::Serialization(error_msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_description() {
        let context = OperationContext::new(RepositoryOperation::Update, "构建任务 b-1/1")
            .with_additional_info("认领");
        assert_eq!(context.describe(), "更新构建任务 b-1/1 (认领)");
    }

    #[test]
    fn test_pool_errors_are_mapped() {
        let context = OperationContext::new(RepositoryOperation::Read, "Agent 1");
        let err = RepositoryErrorHelpers::database_error(&context, SqlxError::PoolTimedOut);
        assert!(err.to_string().contains("连接池超时"));

        let err = RepositoryErrorHelpers::database_error(&context, SqlxError::RowNotFound);
        assert!(matches!(err, SchedulerError::DatabaseOperation(_)));
    }
}
