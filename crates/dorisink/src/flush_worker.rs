//! Concurrent flush workers.
//!
//! N tasks drain a bounded queue of flushed batches and hand them to the
//! writer. `submit` is a blocking send on purpose: when every worker is
//! busy and the queue is full, the dispatch loop stalls, the batcher keeps
//! accumulating, the consumer's channel fills, and the broker stops
//! delivering. That chain is the back-pressure story; nothing along it
//! drops data.
//!
//! Workers hold their own `Arc<dyn Writer>` and offset tracker handles;
//! they know nothing about the pipeline that feeds them.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use dorisink_observability::metrics::{
    BATCH_FLUSH_DURATION, BATCH_FLUSH_TOTAL, BATCH_SIZE_BYTES, BATCH_SIZE_ROWS,
};

use crate::batcher::Batch;
use crate::consumer::OffsetTracker;
use crate::writer::Writer;

/// Pool of flush workers with a task queue of capacity `2 * worker_count`.
pub struct FlushWorkerPool {
    task_tx: Mutex<Option<mpsc::Sender<Batch>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushWorkerPool {
    pub fn new(worker_count: usize, writer: Arc<dyn Writer>, tracker: OffsetTracker) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<Batch>(worker_count * 2);
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));

        let handles = (0..worker_count)
            .map(|id| {
                let task_rx = task_rx.clone();
                let writer = writer.clone();
                let tracker = tracker.clone();
                tokio::spawn(worker(id, task_rx, writer, tracker))
            })
            .collect();

        info!(count = worker_count, "flush workers started");

        Self {
            task_tx: Mutex::new(Some(task_tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Queue a batch for writing, waiting for a slot when the queue is
    /// full.
    pub async fn submit(&self, batch: Batch) {
        let tx = self
            .task_tx
            .lock()
            .expect("worker pool lock poisoned")
            .clone();
        match tx {
            Some(tx) => {
                let rows = batch.len();
                if tx.send(batch).await.is_err() {
                    error!(rows, "flush task queue closed, batch dropped");
                } else {
                    debug!(rows, "flush task submitted");
                }
            }
            None => error!("flush worker pool already stopped, batch dropped"),
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn stop(&self) {
        // Dropping the sender closes the channel; workers finish whatever
        // is queued, then observe channel-closed and exit.
        self.task_tx.lock().expect("worker pool lock poisoned").take();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("worker pool lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }

        info!("flush workers stopped");
    }
}

async fn worker(
    id: usize,
    task_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Batch>>>,
    writer: Arc<dyn Writer>,
    tracker: OffsetTracker,
) {
    loop {
        // Take the lock only long enough to receive one task; processing
        // happens outside it so workers run concurrently.
        let batch = { task_rx.lock().await.recv().await };
        let Some(batch) = batch else {
            info!(worker_id = id, "flush worker stopped");
            return;
        };

        debug!(worker_id = id, rows = batch.len(), "flush worker processing batch");
        write_batch(writer.as_ref(), &tracker, batch).await;
    }
}

/// Write one batch and account for the outcome.
///
/// On success the batch's per-partition max offsets are marked safe to
/// commit. On failure the batch is gone - the writer already exhausted its
/// retries - and the offsets stay unmarked, so the broker will redeliver
/// those records to a future incarnation of the group.
pub(crate) async fn write_batch(writer: &dyn Writer, tracker: &OffsetTracker, batch: Batch) -> bool {
    if batch.is_empty() {
        return true;
    }

    let start = Instant::now();
    let rows = batch.len();
    let bytes = batch.estimated_bytes;

    match writer.write(&batch.rows).await {
        Ok(_report) => {
            for (partition, offset) in batch.offsets {
                tracker.mark(partition, offset);
            }

            let duration = start.elapsed();
            BATCH_FLUSH_TOTAL.with_label_values(&["success"]).inc();
            BATCH_SIZE_ROWS.observe(rows as f64);
            BATCH_SIZE_BYTES.observe(bytes as f64);
            BATCH_FLUSH_DURATION.observe(duration.as_secs_f64());

            info!(
                rows,
                bytes,
                duration_ms = duration.as_millis() as u64,
                "batch flushed successfully"
            );
            true
        }
        Err(e) => {
            error!(error = %e, code = e.code(), rows, "failed to write batch");
            BATCH_FLUSH_TOTAL.with_label_values(&["failed"]).inc();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dorisink_core::{CellValue, Result, Row, SinkError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::writer::StreamLoadReport;

    struct RecordingWriter {
        written: Mutex<Vec<usize>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl RecordingWriter {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                written: Mutex::new(Vec::new()),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn write(&self, rows: &[Row]) -> Result<StreamLoadReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::DorisStreamLoad("mock failure".into()));
            }
            self.written.lock().unwrap().push(rows.len());
            Ok(StreamLoadReport::default())
        }

        async fn close(&self) {}
    }

    fn batch_of(rows: usize, partition: i32, max_offset: i64) -> Batch {
        let mut offsets = HashMap::new();
        offsets.insert(partition, max_offset);
        Batch {
            rows: (0..rows).map(|i| vec![CellValue::Int(i as i64)]).collect(),
            offsets,
            estimated_bytes: rows * 8,
        }
    }

    // ---------------------------------------------------------------
    // write_batch
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_write_batch_marks_offsets_on_success() {
        let writer = RecordingWriter::new(false);
        let tracker = OffsetTracker::new();

        let ok = write_batch(writer.as_ref(), &tracker, batch_of(3, 0, 42)).await;
        assert!(ok);
        assert_eq!(tracker.snapshot().get(&0), Some(&42));
        assert_eq!(*writer.written.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_write_batch_leaves_offsets_on_failure() {
        let writer = RecordingWriter::new(true);
        let tracker = OffsetTracker::new();

        let ok = write_batch(writer.as_ref(), &tracker, batch_of(3, 0, 42)).await;
        assert!(!ok);
        assert!(tracker.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_empty_is_noop() {
        let writer = RecordingWriter::new(false);
        let tracker = OffsetTracker::new();

        let ok = write_batch(writer.as_ref(), &tracker, Batch::default()).await;
        assert!(ok);
        assert_eq!(writer.calls.load(Ordering::SeqCst), 0);
    }

    // ---------------------------------------------------------------
    // Pool lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_pool_processes_submitted_batches() {
        let writer = RecordingWriter::new(false);
        let tracker = OffsetTracker::new();
        let pool = FlushWorkerPool::new(2, writer.clone(), tracker.clone());

        pool.submit(batch_of(1, 0, 0)).await;
        pool.submit(batch_of(2, 0, 1)).await;
        pool.submit(batch_of(3, 1, 7)).await;
        pool.stop().await;

        let mut written = writer.written.lock().unwrap().clone();
        written.sort_unstable();
        assert_eq!(written, vec![1, 2, 3]);
        assert_eq!(tracker.snapshot().get(&0), Some(&1));
        assert_eq!(tracker.snapshot().get(&1), Some(&7));
    }

    #[tokio::test]
    async fn test_stop_drains_queue_before_returning() {
        let writer = RecordingWriter::new(false);
        let pool = FlushWorkerPool::new(1, writer.clone(), OffsetTracker::new());

        for i in 0..5 {
            pool.submit(batch_of(1, 0, i)).await;
        }
        pool.stop().await;

        assert_eq!(writer.written.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_submit_after_stop_drops_batch() {
        let writer = RecordingWriter::new(false);
        let pool = FlushWorkerPool::new(1, writer.clone(), OffsetTracker::new());
        pool.stop().await;

        pool.submit(batch_of(1, 0, 0)).await;
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_failures_do_not_stop_pool() {
        let writer = RecordingWriter::new(true);
        let pool = FlushWorkerPool::new(1, writer.clone(), OffsetTracker::new());

        pool.submit(batch_of(1, 0, 0)).await;
        pool.submit(batch_of(1, 0, 1)).await;
        pool.stop().await;

        // Both batches were attempted despite the first failing.
        assert_eq!(writer.calls.load(Ordering::SeqCst), 2);
    }
}
