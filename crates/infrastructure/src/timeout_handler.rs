//! 异步操作的超时控制
//!
//! 数据库、心跳存储和分布式锁的调用都经过这里，避免某个后端卡死拖住整个回收或监控周期。

use dispatch_core::{SchedulerError, SchedulerResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, instrument};

/// 各类后端操作的默认超时
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// 数据库操作超时
    pub database_timeout: Duration,
    /// Redis 等缓存操作超时
    pub cache_timeout: Duration,
    /// 迁移等长时间操作超时
    pub long_running_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            database_timeout: Duration::from_secs(30),
            cache_timeout: Duration::from_secs(5),
            long_running_timeout: Duration::from_secs(300),
        }
    }
}

pub struct TimeoutHandler {
    config: TimeoutConfig,
}

impl TimeoutHandler {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(TimeoutConfig::default())
    }

    #[instrument(skip(self, operation, operation_name))]
    pub async fn database_operation<F, T>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        self.execute_with_timeout(
            operation,
            self.config.database_timeout,
            "数据库",
            operation_name,
        )
        .await
    }

    #[instrument(skip(self, operation, operation_name))]
    pub async fn cache_operation<F, T>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        self.execute_with_timeout(operation, self.config.cache_timeout, "缓存", operation_name)
            .await
    }

    #[instrument(skip(self, operation, operation_name))]
    pub async fn long_running_operation<F, T>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        self.execute_with_timeout(
            operation,
            self.config.long_running_timeout,
            "长时间运行",
            operation_name,
        )
        .await
    }

    async fn execute_with_timeout<F, T>(
        &self,
        operation: F,
        timeout_duration: Duration,
        operation_type: &str,
        operation_name: &str,
    ) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        match timeout(timeout_duration, operation).await {
            Ok(result) => result,
            Err(_) => {
                let error_msg = format!(
                    "{operation_type}操作 '{operation_name}' 超时 (超时时间: {timeout_duration:?})"
                );
                error!("{}", error_msg);
                Err(SchedulerError::timeout_error(error_msg))
            }
        }
    }
}

/// 使用默认超时的便捷入口
pub struct TimeoutUtils;

impl TimeoutUtils {
    pub async fn database<F, T>(operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        TimeoutHandler::with_default_config()
            .database_operation(operation, operation_name)
            .await
    }

    pub async fn cache<F, T>(operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        TimeoutHandler::with_default_config()
            .cache_operation(operation, operation_name)
            .await
    }

    pub async fn migration<F, T>(operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        TimeoutHandler::with_default_config()
            .long_running_operation(operation, operation_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_timeout_handler_success() {
        let handler = TimeoutHandler::with_default_config();

        let result = handler
            .database_operation(async { Ok("success") }, "get_task")
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_cache_operation_timeout() {
        let handler = TimeoutHandler::new(TimeoutConfig {
            cache_timeout: Duration::from_millis(50),
            ..TimeoutConfig::default()
        });

        let result = handler
            .cache_operation(
                async {
                    sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                "get_heartbeat",
            )
            .await;

        let error = result.unwrap_err();
        assert!(error.to_string().contains("超时"));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_utils_propagates_inner_error() {
        let result: SchedulerResult<()> = TimeoutUtils::database(
            async { Err(SchedulerError::Internal("boom".to_string())) },
            "update_where",
        )
        .await;
        assert!(matches!(result, Err(SchedulerError::Internal(_))));
    }
}
