use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/dispatch".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.url.starts_with("postgresql://")
            && !self.url.starts_with("postgres://")
            && !self.url.starts_with("sqlite:")
        {
            return Err(anyhow::anyhow!("数据库URL必须是PostgreSQL或SQLite格式"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

/// Redis configuration (heartbeat store and distributed lock)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// 关闭时使用进程内的心跳存储和锁，仅适合单实例部署
    pub enabled: bool,
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            key_prefix: "dispatch".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("Redis URL格式无效: {}", self.url));
        }
        Ok(())
    }
}

/// 构建任务密钥加密配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base64编码的32字节AES-256密钥，未配置时从环境变量读取
    pub master_key: Option<String>,
}

impl SecurityConfig {
    pub const MASTER_KEY_ENV: &'static str = "DISPATCH_SECRET_MASTER_KEY";

    /// 配置文件优先，其次是环境变量
    pub fn resolve_master_key(&self) -> Option<String> {
        self.master_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(Self::MASTER_KEY_ENV).ok())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(key) = &self.master_key {
            if key.trim().is_empty() {
                return Err(anyhow::anyhow!("加密密钥不能为空字符串"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_validate() {
        let mut config = DatabaseConfig::default();
        assert!(config.validate().is_ok());

        config.url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());

        config.url = "mysql://localhost/dispatch".to_string();
        assert!(config.validate().is_err());

        config = DatabaseConfig {
            min_connections: 20,
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_config_validate() {
        let mut config = RedisConfig::default();
        assert!(config.validate().is_ok());

        config.url = "localhost:6379".to_string();
        assert!(config.validate().is_err());

        config.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_security_master_key_prefers_config() {
        let config = SecurityConfig {
            master_key: Some("from-config".to_string()),
        };
        assert_eq!(config.resolve_master_key().as_deref(), Some("from-config"));
    }
}
