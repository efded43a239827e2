//! Batch writers.
//!
//! The [`Writer`] trait is the seam between the flush path and the
//! destination: flush workers and the inline dispatcher only ever hold a
//! `dyn Writer`, so tests swap in mocks and the production path plugs in
//! [`StreamLoadWriter`].

use async_trait::async_trait;

use dorisink_core::{Result, Row};

pub mod json_lines;
pub mod stream_load;

pub use json_lines::{build_json_lines, BufferPool};
pub use stream_load::{StreamLoadResponse, StreamLoadWriter};

/// What the destination acknowledged for one batch.
#[derive(Debug, Clone, Default)]
pub struct StreamLoadReport {
    pub loaded_rows: i64,
    pub filtered_rows: i64,
    pub load_time_ms: i64,
}

/// Sink for flushed batches.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Write one batch. An empty batch succeeds without any I/O.
    ///
    /// Implementations retry internally; an `Err` means the batch is lost
    /// and the caller should account for it, not resubmit it.
    async fn write(&self, rows: &[Row]) -> Result<StreamLoadReport>;

    /// Release held resources. Called once during shutdown.
    async fn close(&self);
}
