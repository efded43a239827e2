//! Doris Stream Load writer.
//!
//! Serializes a batch as JSON Lines and PUTs it to a frontend's
//! `_stream_load` endpoint. The HTTP client is built once and shared across
//! concurrent flush workers; Doris speaks HTTP/1.1, so the pool is tuned
//! for many keep-alive connections rather than multiplexing.
//!
//! Failures retry with linear backoff (`attempt + 1` seconds) up to
//! `max_retries`; the backoff wait is raced against the shutdown token so
//! cancellation never blocks on a sleeping retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dorisink_core::{Result, Row, SinkError};
use dorisink_observability::metrics::{
    DORIS_ROWS_FILTERED, DORIS_ROWS_LOADED, DORIS_STREAM_LOAD_DURATION,
    DORIS_STREAM_LOAD_ERRORS, DORIS_STREAM_LOAD_RETRIES, DORIS_STREAM_LOAD_TOTAL,
};

use crate::config::DorisConfig;
use crate::writer::json_lines::{build_json_lines, BufferPool};
use crate::writer::{StreamLoadReport, Writer};

/// Response body of a Stream Load request.
///
/// Doris reports many more timing fields; only the ones the pipeline acts
/// on are modeled, and absent fields default so older frontends still
/// parse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StreamLoadResponse {
    pub txn_id: i64,
    pub label: String,
    pub status: String,
    pub message: String,
    pub number_total_rows: i64,
    pub number_loaded_rows: i64,
    pub number_filtered_rows: i64,
    pub number_unselected_rows: i64,
    pub load_bytes: i64,
    pub load_time_ms: i64,
    #[serde(rename = "ErrorURL")]
    pub error_url: String,
}

impl StreamLoadResponse {
    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }
}

/// Writer that bulk-loads batches into Doris over HTTP.
pub struct StreamLoadWriter {
    cfg: DorisConfig,
    client: reqwest::Client,
    columns: Vec<String>,
    fe_cursor: AtomicUsize,
    pool: BufferPool,
    token: CancellationToken,
}

impl StreamLoadWriter {
    pub fn new(
        cfg: DorisConfig,
        columns: Vec<String>,
        token: CancellationToken,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .http1_only()
            .build()
            .map_err(|e| SinkError::DorisConnect(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            cfg,
            client,
            columns,
            fe_cursor: AtomicUsize::new(0),
            pool: BufferPool::new(),
            token,
        })
    }

    /// Round-robin over the configured frontends.
    fn next_fe(&self) -> &str {
        let i = self.fe_cursor.fetch_add(1, Ordering::Relaxed);
        &self.cfg.fe_hosts[i % self.cfg.fe_hosts.len()]
    }

    async fn do_stream_load(&self, payload: Bytes, rows: usize) -> Result<StreamLoadResponse> {
        let fe = self.next_fe();
        let url = format!(
            "http://{}/api/{}/{}/_stream_load",
            fe, self.cfg.database, self.cfg.table
        );

        debug!(url = %url, rows, bytes = payload.len(), "sending stream load request");

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.cfg.user, Some(&self.cfg.password))
            .header("Expect", "100-continue")
            .header("Content-Type", "application/json")
            .header("format", "json")
            .header("read_json_by_line", "true")
            .header("max_filter_ratio", "0.1")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                DORIS_STREAM_LOAD_ERRORS
                    .with_label_values(&["transport"])
                    .inc();
                SinkError::DorisStreamLoad(format!("request to {} failed: {}", fe, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            DORIS_STREAM_LOAD_ERRORS
                .with_label_values(&["http_error"])
                .inc();
            return Err(SinkError::DorisStreamLoad(format!(
                "stream load returned http {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let result: StreamLoadResponse = response.json().await.map_err(|e| {
            DORIS_STREAM_LOAD_ERRORS
                .with_label_values(&["bad_response"])
                .inc();
            SinkError::DorisStreamLoad(format!("failed to parse response: {}", e))
        })?;

        if !result.is_success() {
            DORIS_STREAM_LOAD_ERRORS
                .with_label_values(&["load_failed"])
                .inc();
            return Err(SinkError::DorisStreamLoad(format!(
                "stream load failed: {}, message: {}",
                result.status, result.message
            )));
        }

        info!(
            status = %result.status,
            loaded_rows = result.number_loaded_rows,
            filtered_rows = result.number_filtered_rows,
            load_time_ms = result.load_time_ms,
            "stream load response"
        );

        Ok(result)
    }
}

#[async_trait]
impl Writer for StreamLoadWriter {
    async fn write(&self, rows: &[Row]) -> Result<StreamLoadReport> {
        if rows.is_empty() {
            return Ok(StreamLoadReport::default());
        }

        let start = Instant::now();

        let mut buf = self.pool.acquire();
        let built = build_json_lines(rows, &self.columns, &mut buf);
        let payload = Bytes::copy_from_slice(&buf);
        self.pool.release(buf);
        built?;

        let mut last_err = None;
        for attempt in 0..=self.cfg.max_retries {
            match self.do_stream_load(payload.clone(), rows.len()).await {
                Ok(result) => {
                    let duration = start.elapsed();
                    DORIS_STREAM_LOAD_TOTAL.with_label_values(&["success"]).inc();
                    DORIS_ROWS_LOADED.inc_by(result.number_loaded_rows.max(0) as u64);
                    DORIS_ROWS_FILTERED.inc_by(result.number_filtered_rows.max(0) as u64);
                    DORIS_STREAM_LOAD_DURATION.observe(duration.as_secs_f64());

                    info!(
                        rows = rows.len(),
                        bytes = payload.len(),
                        duration_ms = duration.as_millis() as u64,
                        retry = attempt,
                        "stream load success"
                    );

                    return Ok(StreamLoadReport {
                        loaded_rows: result.number_loaded_rows,
                        filtered_rows: result.number_filtered_rows,
                        load_time_ms: result.load_time_ms,
                    });
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry = attempt,
                        max_retries = self.cfg.max_retries,
                        "stream load failed, retrying"
                    );
                    last_err = Some(e);

                    if attempt == self.cfg.max_retries {
                        break;
                    }

                    DORIS_STREAM_LOAD_RETRIES.inc();
                    let backoff = Duration::from_secs((attempt + 1) as u64);
                    tokio::select! {
                        _ = self.token.cancelled() => {
                            DORIS_STREAM_LOAD_TOTAL.with_label_values(&["failed"]).inc();
                            return Err(SinkError::DorisStreamLoad(
                                "cancelled while waiting to retry".to_string(),
                            ));
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        DORIS_STREAM_LOAD_TOTAL.with_label_values(&["failed"]).inc();
        Err(SinkError::DorisStreamLoad(format!(
            "stream load failed after {} retries: {}",
            self.cfg.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn close(&self) {
        // Dropping the client releases idle pool connections; nothing else
        // is held open between requests.
        debug!("stream load writer closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_with_hosts(hosts: Vec<String>) -> StreamLoadWriter {
        let cfg = DorisConfig {
            fe_hosts: hosts,
            ..DorisConfig::default()
        };
        StreamLoadWriter::new(cfg, vec!["id".to_string()], CancellationToken::new()).unwrap()
    }

    // ---------------------------------------------------------------
    // Response parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_success_response() {
        let body = r#"{
            "TxnId": 1003,
            "Label": "b6f3bc78-0d2c-45d9-9e4c-faa0a0149bee",
            "Status": "Success",
            "Message": "OK",
            "NumberTotalRows": 1000000,
            "NumberLoadedRows": 1000000,
            "NumberFilteredRows": 1,
            "NumberUnselectedRows": 0,
            "LoadBytes": 40888898,
            "LoadTimeMs": 2144,
            "ErrorURL": ""
        }"#;
        let resp: StreamLoadResponse = serde_json::from_str(body).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.txn_id, 1003);
        assert_eq!(resp.number_loaded_rows, 1_000_000);
        assert_eq!(resp.number_filtered_rows, 1);
        assert_eq!(resp.load_time_ms, 2144);
    }

    #[test]
    fn test_parse_failure_response() {
        let body = r#"{"Status": "Fail", "Message": "too many filtered rows"}"#;
        let resp: StreamLoadResponse = serde_json::from_str(body).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.message, "too many filtered rows");
    }

    #[test]
    fn test_parse_partial_response_uses_defaults() {
        let resp: StreamLoadResponse = serde_json::from_str(r#"{"Status": "Success"}"#).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.number_loaded_rows, 0);
        assert_eq!(resp.error_url, "");
    }

    #[test]
    fn test_publish_timeout_status_is_not_success() {
        let resp: StreamLoadResponse =
            serde_json::from_str(r#"{"Status": "Publish Timeout"}"#).unwrap();
        assert!(!resp.is_success());
    }

    // ---------------------------------------------------------------
    // FE selection
    // ---------------------------------------------------------------

    #[test]
    fn test_fe_round_robin() {
        let writer = writer_with_hosts(vec![
            "fe1:8030".to_string(),
            "fe2:8030".to_string(),
            "fe3:8030".to_string(),
        ]);
        assert_eq!(writer.next_fe(), "fe1:8030");
        assert_eq!(writer.next_fe(), "fe2:8030");
        assert_eq!(writer.next_fe(), "fe3:8030");
        assert_eq!(writer.next_fe(), "fe1:8030");
    }

    #[test]
    fn test_fe_single_host() {
        let writer = writer_with_hosts(vec!["only:8030".to_string()]);
        assert_eq!(writer.next_fe(), "only:8030");
        assert_eq!(writer.next_fe(), "only:8030");
    }

    // ---------------------------------------------------------------
    // Empty batches
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_batch_skips_http_entirely() {
        // The host does not resolve; an attempted request would error.
        let writer = writer_with_hosts(vec!["doris.invalid:8030".to_string()]);
        let report = writer.write(&[]).await.unwrap();
        assert_eq!(report.loaded_rows, 0);
        assert_eq!(report.filtered_rows, 0);
    }
}
