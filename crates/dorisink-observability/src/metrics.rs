use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Kafka Consumer Metrics
    // ============================================================================

    /// Total messages consumed from the broker
    pub static ref KAFKA_MESSAGES_CONSUMED: IntCounterVec = IntCounterVec::new(
        Opts::new("kafka_messages_consumed_total", "Total number of messages consumed from Kafka"),
        &["topic"]
    ).expect("metric can be created");

    /// Total payload bytes consumed from the broker
    pub static ref KAFKA_BYTES_CONSUMED: IntCounterVec = IntCounterVec::new(
        Opts::new("kafka_bytes_consumed_total", "Total bytes consumed from Kafka"),
        &["topic"]
    ).expect("metric can be created");

    /// Consume-side errors by type
    pub static ref KAFKA_CONSUME_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("kafka_consume_errors_total", "Total number of Kafka consume errors"),
        &["topic", "error_type"]
    ).expect("metric can be created");

    // ============================================================================
    // Batch Metrics
    // ============================================================================

    /// Batch flushes by outcome (success, failed, submitted, error)
    pub static ref BATCH_FLUSH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_flush_total", "Total number of batch flushes"),
        &["status"]
    ).expect("metric can be created");

    /// Flushed batch size in rows
    pub static ref BATCH_SIZE_ROWS: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size_rows", "Batch size in rows")
            .buckets(vec![100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0])
    ).expect("metric can be created");

    /// Flushed batch size in estimated bytes
    pub static ref BATCH_SIZE_BYTES: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size_bytes", "Batch size in bytes")
            .buckets(vec![1024.0, 10240.0, 102400.0, 1048576.0, 10485760.0, 104857600.0])
    ).expect("metric can be created");

    /// End-to-end flush duration
    pub static ref BATCH_FLUSH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_flush_duration_seconds", "Batch flush duration in seconds")
    ).expect("metric can be created");

    /// Rows currently sitting in the accumulator
    pub static ref BATCH_CURRENT_ROWS: IntGauge = IntGauge::new(
        "batch_current_rows",
        "Current number of rows in batch"
    ).expect("metric can be created");

    /// Estimated bytes currently sitting in the accumulator
    pub static ref BATCH_CURRENT_BYTES: IntGauge = IntGauge::new(
        "batch_current_bytes",
        "Current batch size in bytes"
    ).expect("metric can be created");

    // ============================================================================
    // Doris Stream Load Metrics
    // ============================================================================

    /// Stream Load requests by outcome
    pub static ref DORIS_STREAM_LOAD_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("doris_stream_load_total", "Total number of stream load requests"),
        &["status"]
    ).expect("metric can be created");

    /// Rows acknowledged as loaded by Doris
    pub static ref DORIS_ROWS_LOADED: IntCounter = IntCounter::new(
        "doris_rows_loaded_total",
        "Total number of rows loaded to Doris"
    ).expect("metric can be created");

    /// Rows filtered server-side by Doris
    pub static ref DORIS_ROWS_FILTERED: IntCounter = IntCounter::new(
        "doris_rows_filtered_total",
        "Total number of rows filtered by Doris"
    ).expect("metric can be created");

    /// Stream Load request duration
    pub static ref DORIS_STREAM_LOAD_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("doris_stream_load_duration_seconds", "Stream load duration in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0])
    ).expect("metric can be created");

    /// Stream Load retry attempts
    pub static ref DORIS_STREAM_LOAD_RETRIES: IntCounter = IntCounter::new(
        "doris_stream_load_retries_total",
        "Total number of stream load retries"
    ).expect("metric can be created");

    /// Stream Load errors by type
    pub static ref DORIS_STREAM_LOAD_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("doris_stream_load_errors_total", "Total number of stream load errors"),
        &["error_type"]
    ).expect("metric can be created");

    // ============================================================================
    // Mapping Metrics
    // ============================================================================

    /// Records whose payload failed to parse as JSON
    pub static ref JSON_PARSE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("json_parse_errors_total", "Total number of JSON parse errors"),
        &["field"]
    ).expect("metric can be created");

    /// Fields absent from the source document
    pub static ref FIELD_MISSING: IntCounterVec = IntCounterVec::new(
        Opts::new("field_missing_total", "Total number of missing fields"),
        &["field"]
    ).expect("metric can be created");

    /// Fields whose JSON type did not match the column type
    pub static ref FIELD_TYPE_CONVERSION_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("field_type_conversion_errors_total", "Total number of field type conversion errors"),
        &["field", "from_type", "to_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        // Kafka metrics
        REGISTRY
            .register(Box::new(KAFKA_MESSAGES_CONSUMED.clone()))
            .expect("kafka_messages_consumed can be registered");
        REGISTRY
            .register(Box::new(KAFKA_BYTES_CONSUMED.clone()))
            .expect("kafka_bytes_consumed can be registered");
        REGISTRY
            .register(Box::new(KAFKA_CONSUME_ERRORS.clone()))
            .expect("kafka_consume_errors can be registered");

        // Batch metrics
        REGISTRY
            .register(Box::new(BATCH_FLUSH_TOTAL.clone()))
            .expect("batch_flush_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_SIZE_ROWS.clone()))
            .expect("batch_size_rows can be registered");
        REGISTRY
            .register(Box::new(BATCH_SIZE_BYTES.clone()))
            .expect("batch_size_bytes can be registered");
        REGISTRY
            .register(Box::new(BATCH_FLUSH_DURATION.clone()))
            .expect("batch_flush_duration can be registered");
        REGISTRY
            .register(Box::new(BATCH_CURRENT_ROWS.clone()))
            .expect("batch_current_rows can be registered");
        REGISTRY
            .register(Box::new(BATCH_CURRENT_BYTES.clone()))
            .expect("batch_current_bytes can be registered");

        // Doris metrics
        REGISTRY
            .register(Box::new(DORIS_STREAM_LOAD_TOTAL.clone()))
            .expect("doris_stream_load_total can be registered");
        REGISTRY
            .register(Box::new(DORIS_ROWS_LOADED.clone()))
            .expect("doris_rows_loaded can be registered");
        REGISTRY
            .register(Box::new(DORIS_ROWS_FILTERED.clone()))
            .expect("doris_rows_filtered can be registered");
        REGISTRY
            .register(Box::new(DORIS_STREAM_LOAD_DURATION.clone()))
            .expect("doris_stream_load_duration can be registered");
        REGISTRY
            .register(Box::new(DORIS_STREAM_LOAD_RETRIES.clone()))
            .expect("doris_stream_load_retries can be registered");
        REGISTRY
            .register(Box::new(DORIS_STREAM_LOAD_ERRORS.clone()))
            .expect("doris_stream_load_errors can be registered");

        // Mapping metrics
        REGISTRY
            .register(Box::new(JSON_PARSE_ERRORS.clone()))
            .expect("json_parse_errors can be registered");
        REGISTRY
            .register(Box::new(FIELD_MISSING.clone()))
            .expect("field_missing can be registered");
        REGISTRY
            .register(Box::new(FIELD_TYPE_CONVERSION_ERRORS.clone()))
            .expect("field_type_conversion_errors can be registered");
    });
}
