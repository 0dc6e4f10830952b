use serde::{Deserialize, Serialize};

use crate::models::Zone;

/// 构建任务调度与回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enabled: bool,
    /// 回收扫描间隔（秒）
    pub reclaim_interval_seconds: u64,
    /// 已认领但仍在排队的任务多久后释放构建机标识（秒）
    pub host_tag_reclaim_seconds: i64,
    /// 指定机房的任务多久后改投默认机房（秒）
    pub zone_reclaim_seconds: i64,
    /// 任务全局超时（秒），超过后强制置为失败
    pub task_timeout_seconds: i64,
    /// 机房回收的目标机房
    pub default_zone: Zone,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reclaim_interval_seconds: 5,
            host_tag_reclaim_seconds: 20,
            zone_reclaim_seconds: 40,
            task_timeout_seconds: 2 * 24 * 60 * 60,
            default_zone: Zone::Shenzhen,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reclaim_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收扫描间隔必须大于0"));
        }

        if self.host_tag_reclaim_seconds <= 0 {
            return Err(anyhow::anyhow!("构建机标识回收阈值必须大于0"));
        }

        if self.zone_reclaim_seconds < self.host_tag_reclaim_seconds {
            return Err(anyhow::anyhow!(
                "机房回收阈值({}s)不能小于构建机标识回收阈值({}s)",
                self.zone_reclaim_seconds,
                self.host_tag_reclaim_seconds
            ));
        }

        if self.task_timeout_seconds <= self.zone_reclaim_seconds {
            return Err(anyhow::anyhow!("任务全局超时必须大于机房回收阈值"));
        }

        Ok(())
    }
}

/// Agent心跳监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Agent上报心跳的间隔（秒）
    pub interval_seconds: u64,
    /// 已导入Agent超过多少个心跳间隔未上报视为异常
    pub ok_agent_multiplier: u32,
    /// 未导入Agent超过多少个心跳间隔未上报回退为未导入
    pub unimport_multiplier: u32,
    /// 监控执行间隔（毫秒）
    pub check_interval_ms: u64,
    /// 首次执行前的延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 单实例执行锁的过期时间（秒）
    pub lock_ttl_seconds: u64,
    /// 覆盖默认的锁名称
    pub lock_key: Option<String>,
    /// 心跳记录的过期时间（秒）
    pub record_ttl_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 5,
            ok_agent_multiplier: 10,
            unimport_multiplier: 2,
            check_interval_ms: 3000,
            initial_delay_ms: 5000,
            lock_ttl_seconds: 60,
            lock_key: None,
            record_ttl_seconds: 600,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.ok_agent_multiplier == 0 || self.unimport_multiplier == 0 {
            return Err(anyhow::anyhow!("心跳超时倍数必须大于0"));
        }

        if self.check_interval_ms == 0 {
            return Err(anyhow::anyhow!("监控执行间隔必须大于0"));
        }

        if self.lock_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("锁过期时间必须大于0"));
        }

        let ok_threshold = self.interval_seconds * u64::from(self.ok_agent_multiplier);
        if self.record_ttl_seconds <= ok_threshold {
            return Err(anyhow::anyhow!(
                "心跳记录过期时间({}s)必须大于异常判定阈值({}s)",
                self.record_ttl_seconds,
                ok_threshold
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_defaults() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.host_tag_reclaim_seconds, 20);
        assert_eq!(config.zone_reclaim_seconds, 40);
        assert_eq!(config.task_timeout_seconds, 172_800);
        assert_eq!(config.default_zone, Zone::Shenzhen);
    }

    #[test]
    fn test_dispatch_config_rejects_inverted_thresholds() {
        let config = DispatchConfig {
            host_tag_reclaim_seconds: 60,
            zone_reclaim_seconds: 40,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_config_validate() {
        assert!(HeartbeatConfig::default().validate().is_ok());

        let config = HeartbeatConfig {
            record_ttl_seconds: 30,
            ..HeartbeatConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HeartbeatConfig {
            unimport_multiplier: 0,
            ..HeartbeatConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
