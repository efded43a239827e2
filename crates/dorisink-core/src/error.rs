//! Error types for the dorisink pipeline.
//!
//! Every failure in the system maps to one variant of [`SinkError`]. Each
//! variant carries a stable numeric code (see [`SinkError::code`]) so that
//! operators can grep logs and alert on classes of failure without parsing
//! message text.

use thiserror::Error;

/// Errors that can occur anywhere in the ingestion pipeline.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Failed to construct or connect the Kafka client.
    #[error("kafka connect error: {0}")]
    KafkaConnect(String),

    /// Error while consuming records from the broker.
    #[error("kafka consume error: {0}")]
    KafkaConsume(String),

    /// Failed to commit consumer group offsets.
    #[error("kafka commit error: {0}")]
    KafkaCommit(String),

    /// Failed to fetch or build the table schema.
    #[error("schema fetch error: {0}")]
    SchemaFetch(String),

    /// A record's payload was not parseable as JSON.
    #[error("json parse error: {0}")]
    JsonParse(String),

    /// A field could not be mapped onto its column.
    #[error("field mapping error: {0}")]
    FieldMapping(String),

    /// A field value could not be coerced to its column type.
    #[error("type conversion error: {0}")]
    TypeConvert(String),

    /// The batch accumulator rejected a row.
    #[error("batch full: {0}")]
    BatchFull(String),

    /// Flushing the batch accumulator failed.
    #[error("batch flush error: {0}")]
    BatchFlush(String),

    /// Failed to reach a Doris frontend.
    #[error("doris connect error: {0}")]
    DorisConnect(String),

    /// A Stream Load request failed after retries were exhausted.
    #[error("doris stream load error: {0}")]
    DorisStreamLoad(String),

    /// A SQL query against a Doris frontend failed.
    #[error("doris query error: {0}")]
    DorisQuery(String),

    /// Configuration file could not be read or parsed.
    #[error("config load error: {0}")]
    ConfigLoad(String),

    /// Configuration content failed validation.
    #[error("config validate error: {0}")]
    ConfigValidate(String),
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SinkError>;

impl SinkError {
    /// Stable numeric code for this error kind.
    ///
    /// Codes are grouped by subsystem: 1xxx Kafka, 2xxx schema/mapping,
    /// 3xxx batching, 4xxx Doris, 5xxx configuration.
    pub fn code(&self) -> u32 {
        match self {
            SinkError::KafkaConnect(_) => 1001,
            SinkError::KafkaConsume(_) => 1002,
            SinkError::KafkaCommit(_) => 1003,
            SinkError::SchemaFetch(_) => 2001,
            SinkError::JsonParse(_) => 2002,
            SinkError::FieldMapping(_) => 2003,
            SinkError::TypeConvert(_) => 2004,
            SinkError::BatchFull(_) => 3001,
            SinkError::BatchFlush(_) => 3002,
            SinkError::DorisConnect(_) => 4001,
            SinkError::DorisStreamLoad(_) => 4002,
            SinkError::DorisQuery(_) => 4003,
            SinkError::ConfigLoad(_) => 5001,
            SinkError::ConfigValidate(_) => 5002,
        }
    }

    /// Whether the operation that produced this error is worth retrying.
    ///
    /// Only transient transport-level failures qualify; everything else is
    /// either permanent (bad config, bad schema) or already handled by the
    /// lossy per-record degradation policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SinkError::KafkaConnect(_)
                | SinkError::DorisConnect(_)
                | SinkError::DorisStreamLoad(_)
        )
    }

    /// Short label for this error kind, used as a metric label value.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::KafkaConnect(_) => "kafka_connect",
            SinkError::KafkaConsume(_) => "kafka_consume",
            SinkError::KafkaCommit(_) => "kafka_commit",
            SinkError::SchemaFetch(_) => "schema_fetch",
            SinkError::JsonParse(_) => "json_parse",
            SinkError::FieldMapping(_) => "field_mapping",
            SinkError::TypeConvert(_) => "type_convert",
            SinkError::BatchFull(_) => "batch_full",
            SinkError::BatchFlush(_) => "batch_flush",
            SinkError::DorisConnect(_) => "doris_connect",
            SinkError::DorisStreamLoad(_) => "doris_stream_load",
            SinkError::DorisQuery(_) => "doris_query",
            SinkError::ConfigLoad(_) => "config_load",
            SinkError::ConfigValidate(_) => "config_validate",
        }
    }
}
