//! Row batching.
//!
//! The batcher accumulates mapped rows under a mutex and decides when a
//! flush is due. Three triggers, any of which suffices: row count, estimated
//! byte size, and age of the oldest unflushed row. Flush notifications go
//! through a capacity-1 channel written with `try_send`, so any number of
//! pending triggers collapse into at most one signal — the dispatch loop is
//! never starved and never spammed.
//!
//! The mutex only ever guards O(1) appends and the snapshot swap; no I/O
//! happens under the lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dorisink_core::{estimate_row_size, Row};
use dorisink_observability::metrics::{BATCH_CURRENT_BYTES, BATCH_CURRENT_ROWS};

use crate::config::BatchConfig;

/// A flushed snapshot of the accumulator.
///
/// Alongside the rows it carries, per partition, the highest offset of any
/// message that contributed a row. The flush path hands these offsets to
/// the consumer's commit tracker only after Doris acknowledges the write,
/// so commits can never run ahead of durable data.
#[derive(Debug, Default)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub offsets: HashMap<i32, i64>,
    pub estimated_bytes: usize,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

struct Accumulator {
    rows: Vec<Row>,
    offsets: HashMap<i32, i64>,
    current_bytes: usize,
    last_flush: Instant,
    closed: bool,
}

/// Mutex-guarded row accumulator with coalesced flush signaling.
pub struct Batcher {
    max_rows: usize,
    max_bytes: usize,
    max_interval: Duration,
    inner: Mutex<Accumulator>,
    signal_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Batcher {
    /// Create a batcher and the receiving end of its flush-signal channel.
    pub fn new(cfg: &BatchConfig) -> (Self, mpsc::Receiver<()>) {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let batcher = Self {
            max_rows: cfg.max_batch_rows,
            max_bytes: cfg.max_batch_size,
            max_interval: Duration::from_secs(cfg.max_batch_interval_secs),
            inner: Mutex::new(Accumulator {
                rows: Vec::with_capacity(cfg.max_batch_rows),
                offsets: HashMap::new(),
                current_bytes: 0,
                last_flush: Instant::now(),
                closed: false,
            }),
            signal_tx: Mutex::new(Some(signal_tx)),
        };
        (batcher, signal_rx)
    }

    /// Append a row, recording which partition offset it came from.
    ///
    /// Silently does nothing after [`Batcher::close`]. Posts a coalesced
    /// flush signal when any trigger becomes true; the trigger check runs
    /// after the append, so the row that crossed a threshold is part of the
    /// snapshot that flushes.
    pub fn add(&self, row: Row, partition: i32, offset: i64) {
        let should_signal = {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            if inner.closed {
                return;
            }

            inner.current_bytes += estimate_row_size(&row);
            inner.rows.push(row);
            inner
                .offsets
                .entry(partition)
                .and_modify(|o| *o = (*o).max(offset))
                .or_insert(offset);

            BATCH_CURRENT_ROWS.set(inner.rows.len() as i64);
            BATCH_CURRENT_BYTES.set(inner.current_bytes as i64);

            self.should_flush_locked(&inner)
        };

        if should_signal {
            self.signal();
        }
    }

    /// Atomically snapshot the accumulator and reset it.
    ///
    /// The returned batch may be empty; callers should treat that as a
    /// no-op rather than an error.
    pub fn flush(&self) -> Batch {
        let mut inner = self.inner.lock().expect("batcher lock poisoned");

        let rows = std::mem::take(&mut inner.rows);
        let offsets = std::mem::take(&mut inner.offsets);
        let estimated_bytes = inner.current_bytes;
        inner.current_bytes = 0;
        inner.last_flush = Instant::now();

        BATCH_CURRENT_ROWS.set(0);
        BATCH_CURRENT_BYTES.set(0);

        if !rows.is_empty() {
            debug!(rows = rows.len(), bytes = estimated_bytes, "batch flushed");
        }

        Batch {
            rows,
            offsets,
            estimated_bytes,
        }
    }

    /// Whether any flush trigger currently holds.
    pub fn should_flush(&self) -> bool {
        let inner = self.inner.lock().expect("batcher lock poisoned");
        self.should_flush_locked(&inner)
    }

    fn should_flush_locked(&self, inner: &Accumulator) -> bool {
        if inner.rows.len() >= self.max_rows {
            return true;
        }
        if inner.current_bytes >= self.max_bytes {
            return true;
        }
        if inner.last_flush.elapsed() >= self.max_interval {
            return !inner.rows.is_empty();
        }
        false
    }

    /// Number of rows currently accumulated.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("batcher lock poisoned").rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodic trigger check, so the interval trigger fires even when no
    /// new rows arrive. Runs until cancelled.
    pub async fn run_ticker(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("batcher ticker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if self.should_flush() {
                        self.signal();
                    }
                }
            }
        }
    }

    /// Mark the batcher closed and close the signal channel.
    ///
    /// Subsequent [`Batcher::add`] calls are silent no-ops and the signal
    /// channel is never written again; the dispatch loop observes
    /// channel-closed and exits.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            inner.closed = true;
        }
        // Dropping the only sender closes the channel.
        self.signal_tx.lock().expect("signal lock poisoned").take();
    }

    fn signal(&self) {
        if let Some(tx) = self.signal_tx.lock().expect("signal lock poisoned").as_ref() {
            // A pending token already guarantees a dispatch; drop this one.
            let _ = tx.try_send(());
        }
    }
}
