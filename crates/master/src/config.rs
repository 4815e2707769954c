//! Master configuration
//!
//! Loaded from YAML; every section has defaults so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::alarm::AlarmReceiver;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("serialize error: {0}")]
    SerializeError(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub workers: WorkerConfig,
    pub alarm: AlarmConfig,
    pub log: LogConfig,
}

impl MasterConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.replica_num == 0 {
            return Err(ConfigError::Invalid("schedule.replica_num must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.schedule.max_storage_ratio) {
            return Err(ConfigError::Invalid(
                "schedule.max_storage_ratio must be within [0, 1]".into(),
            ));
        }
        let durations = [
            ("node_heartbeat_timeout_secs", self.schedule.node_heartbeat_timeout_secs),
            ("range_heartbeat_timeout_secs", self.schedule.range_heartbeat_timeout_secs),
            ("unhealthy_range_ttl_secs", self.schedule.unhealthy_range_ttl_secs),
            ("retention_secs", self.schedule.retention_secs),
            ("rpc_timeout_secs", self.schedule.rpc_timeout_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "schedule.{} must be <= {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.alarm.queue_capacity == 0 {
            return Err(ConfigError::Invalid("alarm.queue_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Cluster identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_id: u64,
    /// Id of this master instance
    pub node_id: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            node_id: 1,
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "./master_data".to_string(),
        }
    }
}

/// Upper bound for every duration setting (100 years)
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

/// Placement and scheduling thresholds (durations in seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Target number of peers per range
    pub replica_num: usize,
    /// Nodes at or above this write rate take no new replicas
    pub max_write_ops: u64,
    /// Nodes at or above this used/capacity ratio take no new replicas
    pub max_storage_ratio: f64,
    pub node_heartbeat_timeout_secs: u64,
    pub range_heartbeat_timeout_secs: u64,
    pub unhealthy_range_ttl_secs: u64,
    /// How long a deleted table is retained before physical cleanup
    pub retention_secs: u64,
    /// Minimum leader-count difference that triggers a leader transfer
    pub leader_balance_threshold: u64,
    /// Minimum range-count difference that triggers a replica move
    pub range_balance_threshold: u64,
    /// Hot node write ops must exceed the cold node's by this factor
    pub ops_balance_ratio: f64,
    pub rpc_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            replica_num: 3,
            max_write_ops: 30_000,
            max_storage_ratio: 0.85,
            node_heartbeat_timeout_secs: 30,
            range_heartbeat_timeout_secs: 120,
            unhealthy_range_ttl_secs: 120,
            retention_secs: 3 * 24 * 3600,
            leader_balance_threshold: 5,
            range_balance_threshold: 10,
            ops_balance_ratio: 2.0,
            rpc_timeout_secs: 5,
        }
    }
}

impl ScheduleConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn unhealthy_range_ttl(&self) -> Duration {
        Duration::from_secs(self.unhealthy_range_ttl_secs)
    }
}

/// Background worker intervals (milliseconds) and the set started by `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub failover_interval_ms: u64,
    pub delete_table_interval_ms: u64,
    pub trash_replica_gc_interval_ms: u64,
    pub create_table_interval_ms: u64,
    pub range_hb_check_interval_ms: u64,
    pub balance_leader_interval_ms: u64,
    pub balance_range_interval_ms: u64,
    pub balance_node_ops_interval_ms: u64,
    pub event_dispatch_interval_ms: u64,
    /// Worker names started with the cluster; empty means all
    pub enabled: Vec<String>,
}

const DEFAULT_WORKER_INTERVAL_MS: u64 = 10_000;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            failover_interval_ms: 1_000,
            delete_table_interval_ms: 10 * 60 * 1_000,
            trash_replica_gc_interval_ms: 60 * 1_000,
            create_table_interval_ms: 1_000,
            range_hb_check_interval_ms: 2 * 60 * 1_000,
            balance_leader_interval_ms: 5 * DEFAULT_WORKER_INTERVAL_MS,
            balance_range_interval_ms: 5 * DEFAULT_WORKER_INTERVAL_MS,
            balance_node_ops_interval_ms: 5 * DEFAULT_WORKER_INTERVAL_MS,
            event_dispatch_interval_ms: 1_000,
            enabled: Vec::new(),
        }
    }
}

/// Alarm gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// HTTP endpoint receiving `{title, content, mailTo, smsTo}`
    pub gateway_addr: String,
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
    /// Cluster id 0 receives alarms of every cluster
    pub receivers: Vec<AlarmReceiver>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "http://127.0.0.1:8818/alarm".to_string(),
            queue_capacity: 1024,
            request_timeout_secs: 5,
            receivers: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
