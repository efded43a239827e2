//! Service configuration.
//!
//! Loaded once at startup from a YAML file, overridden from the environment
//! for secrets, validated, and then treated as immutable. Every tunable the
//! pipeline honors lives here; nothing reads configuration after
//! construction.

use std::fmt;

use serde::Deserialize;

use dorisink_core::{Result, SinkError};

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub doris: DorisConfig,
    pub batch: BatchConfig,
    pub schema: SchemaConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

/// Kafka consumption settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    /// Start from the earliest offset when the group has no committed
    /// position; otherwise start from the latest.
    pub from_earliest: bool,
    /// Bounds the in-process message queue between the poll loop and the
    /// pipeline, which is where back-pressure to the broker originates.
    pub max_fetch_records: usize,
    pub max_fetch_bytes: usize,
    #[serde(rename = "session_timeout_s")]
    pub session_timeout_secs: u64,
    #[serde(rename = "heartbeat_interval_s")]
    pub heartbeat_interval_secs: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "event_topic".to_string(),
            group_id: "dorisink-group".to_string(),
            from_earliest: true,
            max_fetch_records: 1000,
            max_fetch_bytes: 1048576,
            session_timeout_secs: 30,
            heartbeat_interval_secs: 3,
        }
    }
}

/// Doris connection settings, shared by the Stream Load writer and the
/// schema fetcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DorisConfig {
    pub fe_hosts: Vec<String>,
    pub query_port: u16,
    pub database: String,
    pub table: String,
    pub user: String,
    pub password: String,
    #[serde(rename = "timeout_s")]
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for DorisConfig {
    fn default() -> Self {
        Self {
            fe_hosts: vec!["127.0.0.1:8030".to_string()],
            query_port: 9030,
            database: "test_db".to_string(),
            table: "tb_event".to_string(),
            user: "root".to_string(),
            password: String::new(),
            timeout_secs: 600,
            max_retries: 3,
        }
    }
}

/// Batch accumulation thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_rows: usize,
    /// Estimated payload bytes, not serialized bytes; advisory threshold.
    pub max_batch_size: usize,
    #[serde(rename = "max_batch_interval_s")]
    pub max_batch_interval_secs: u64,
    /// Number of concurrent flush workers; 0 or 1 means inline flushing.
    pub flush_worker_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_rows: 10000,
            max_batch_size: 10485760,
            max_batch_interval_secs: 30,
            flush_worker_count: 4,
        }
    }
}

/// How the target table's schema is obtained at startup.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SchemaConfig {
    pub mode: SchemaMode,
    pub manual: ManualSchemaConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// `DESCRIBE` the table through a frontend's MySQL port.
    #[default]
    Auto,
    /// Take the column list verbatim from configuration.
    Manual,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ManualSchemaConfig {
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Admin HTTP server settings (metrics, health, readiness).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// `DORIS_PASSWORD` from the environment takes precedence over the file
    /// so the secret never has to live on disk. The returned config has
    /// already passed [`Config::validate`].
    pub fn load(path: &str) -> Result<Config> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| SinkError::ConfigLoad(format!("failed to read {}: {}", path, e)))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| SinkError::ConfigLoad(format!("failed to parse {}: {}", path, e)))?;

        if let Ok(password) = std::env::var("DORIS_PASSWORD") {
            if !password.is_empty() {
                cfg.doris.password = password;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration content.
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(SinkError::ConfigValidate("kafka.brokers is required".into()));
        }
        if self.kafka.topic.is_empty() {
            return Err(SinkError::ConfigValidate("kafka.topic is required".into()));
        }
        if self.kafka.group_id.is_empty() {
            return Err(SinkError::ConfigValidate("kafka.group_id is required".into()));
        }
        if self.kafka.max_fetch_records == 0 {
            return Err(SinkError::ConfigValidate(
                "kafka.max_fetch_records must be positive".into(),
            ));
        }
        if self.kafka.max_fetch_bytes == 0 {
            return Err(SinkError::ConfigValidate(
                "kafka.max_fetch_bytes must be positive".into(),
            ));
        }

        if self.doris.fe_hosts.is_empty() {
            return Err(SinkError::ConfigValidate("doris.fe_hosts is required".into()));
        }
        if self.doris.database.is_empty() {
            return Err(SinkError::ConfigValidate("doris.database is required".into()));
        }
        if self.doris.table.is_empty() {
            return Err(SinkError::ConfigValidate("doris.table is required".into()));
        }
        if self.doris.user.is_empty() {
            return Err(SinkError::ConfigValidate("doris.user is required".into()));
        }
        if self.doris.query_port == 0 {
            return Err(SinkError::ConfigValidate(
                "doris.query_port must be positive".into(),
            ));
        }

        if self.batch.max_batch_rows == 0 {
            return Err(SinkError::ConfigValidate(
                "batch.max_batch_rows must be positive".into(),
            ));
        }
        if self.batch.max_batch_size == 0 {
            return Err(SinkError::ConfigValidate(
                "batch.max_batch_size must be positive".into(),
            ));
        }
        if self.batch.max_batch_interval_secs == 0 {
            return Err(SinkError::ConfigValidate(
                "batch.max_batch_interval must be positive".into(),
            ));
        }

        if self.schema.mode == SchemaMode::Manual && self.schema.manual.columns.is_empty() {
            return Err(SinkError::ConfigValidate(
                "schema.manual.columns is required when mode is 'manual'".into(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(SinkError::ConfigValidate(
                "metrics.port must be positive when enabled".into(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Config {
    /// Summary with the password redacted; safe to log at startup.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config{{kafka: {:?} topic={} group={}, doris: {}.{} via {:?}, batch: rows={} bytes={} interval={}s workers={}, schema: {:?}}}",
            self.kafka.brokers,
            self.kafka.topic,
            self.kafka.group_id,
            self.doris.database,
            self.doris.table,
            self.doris.fe_hosts,
            self.batch.max_batch_rows,
            self.batch.max_batch_size,
            self.batch.max_batch_interval_secs,
            self.batch.flush_worker_count,
            self.schema.mode,
        )
    }
}
