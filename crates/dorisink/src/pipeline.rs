//! Pipeline orchestration.
//!
//! Wires consumer → mapper → batcher → flush path → writer and owns the
//! long-running loops:
//!
//! ```text
//! Consumer ─(bounded channel)→ process_messages ─→ Batcher
//!                                                    │ coalesced signal
//!                                                    ▼
//!                                      flush_dispatch ─→ worker pool ─→ Writer
//!                                                     └→ inline write ─→ Writer
//! ```
//!
//! Shutdown is a strict sequence: cancel the token (loops exit,
//! flush_dispatch drains the accumulator one last time), stop the worker
//! pool (drains queued batches), close the consumer (final synchronous
//! offset commit), close the batcher, close the writer. Failures along the
//! way are logged and never mask each other.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dorisink_core::{Result, SinkError};
use dorisink_observability::metrics::{
    BATCH_FLUSH_TOTAL, KAFKA_BYTES_CONSUMED, KAFKA_MESSAGES_CONSUMED,
};

use crate::batcher::Batcher;
use crate::consumer::{Consumer, Message, OffsetTracker};
use crate::flush_worker::{write_batch, FlushWorkerPool};
use crate::mapper::Mapper;
use crate::writer::Writer;

/// Top-level ingestion pipeline.
pub struct Pipeline {
    consumer: Arc<dyn Consumer>,
    mapper: Mapper,
    batcher: Arc<Batcher>,
    writer: Arc<dyn Writer>,
    tracker: OffsetTracker,
    flush_worker_count: usize,
    workers: Mutex<Option<Arc<FlushWorkerPool>>>,
    signal_rx: Mutex<Option<mpsc::Receiver<()>>>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Assemble a pipeline. Nothing runs until [`Pipeline::start`].
    ///
    /// `signal_rx` is the receiving end of the batcher's flush-signal
    /// channel, as returned by [`Batcher::new`].
    pub fn new(
        consumer: Arc<dyn Consumer>,
        mapper: Mapper,
        batcher: Batcher,
        signal_rx: mpsc::Receiver<()>,
        writer: Arc<dyn Writer>,
        flush_worker_count: usize,
        token: CancellationToken,
    ) -> Self {
        let tracker = consumer.offset_tracker();
        Self {
            consumer,
            mapper,
            batcher: Arc::new(batcher),
            writer,
            tracker,
            flush_worker_count,
            workers: Mutex::new(None),
            signal_rx: Mutex::new(Some(signal_rx)),
            token,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the consumer, the batcher ticker, the worker pool (when
    /// configured) and the two pipeline loops.
    pub async fn start(&self) -> Result<()> {
        info!("starting pipeline");

        self.consumer.start(self.token.clone()).await?;

        let mut handles = Vec::new();

        {
            let batcher = self.batcher.clone();
            let token = self.token.clone();
            handles.push(tokio::spawn(async move {
                batcher.run_ticker(token).await;
            }));
        }

        let workers = if self.flush_worker_count > 1 {
            Some(Arc::new(FlushWorkerPool::new(
                self.flush_worker_count,
                self.writer.clone(),
                self.tracker.clone(),
            )))
        } else {
            None
        };
        *self.workers.lock().expect("pipeline lock poisoned") = workers.clone();

        let msg_rx = self.consumer.take_messages().ok_or_else(|| {
            SinkError::KafkaConsume("message channel already taken".to_string())
        })?;
        handles.push(tokio::spawn(process_messages(
            msg_rx,
            self.mapper.clone(),
            self.batcher.clone(),
            self.token.clone(),
        )));

        let signal_rx = self
            .signal_rx
            .lock()
            .expect("pipeline lock poisoned")
            .take()
            .ok_or_else(|| SinkError::BatchFlush("flush signal already taken".to_string()))?;
        handles.push(tokio::spawn(flush_dispatch(
            signal_rx,
            self.batcher.clone(),
            workers,
            self.writer.clone(),
            self.tracker.clone(),
            self.token.clone(),
        )));

        self.handles
            .lock()
            .expect("pipeline lock poisoned")
            .extend(handles);

        info!("pipeline started");
        Ok(())
    }

    /// Graceful shutdown. Callers bound the whole sequence with a timeout.
    pub async fn stop(&self) {
        info!("stopping pipeline");

        self.token.cancel();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("pipeline lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }

        let workers = self.workers.lock().expect("pipeline lock poisoned").take();
        if let Some(pool) = workers {
            pool.stop().await;
        }

        // Closed after the flush paths finished, so the final synchronous
        // commit covers every offset they marked.
        self.consumer.close().await;
        self.batcher.close();
        self.writer.close().await;

        info!("pipeline stopped");
    }
}

/// Drain the consumer channel into the batcher.
async fn process_messages(
    mut msg_rx: mpsc::Receiver<Message>,
    mapper: Mapper,
    batcher: Arc<Batcher>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("message processing stopped");
                return;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    info!("message channel closed");
                    return;
                };

                // Mapping is lossy-but-total: a row always comes back, with
                // per-field degradations already counted by the mapper.
                let row = mapper.map_json_to_row(&msg.value);
                batcher.add(row, msg.partition, msg.offset);

                KAFKA_MESSAGES_CONSUMED
                    .with_label_values(&[msg.topic.as_str()])
                    .inc();
                KAFKA_BYTES_CONSUMED
                    .with_label_values(&[msg.topic.as_str()])
                    .inc_by(msg.value.len() as u64);
            }
        }
    }
}

/// Await flush signals and move snapshots to the write path.
async fn flush_dispatch(
    mut signal_rx: mpsc::Receiver<()>,
    batcher: Arc<Batcher>,
    workers: Option<Arc<FlushWorkerPool>>,
    writer: Arc<dyn Writer>,
    tracker: OffsetTracker,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // One final pass so rows accumulated since the last signal
                // are not stranded.
                dispatch_once(&batcher, workers.as_deref(), writer.as_ref(), &tracker).await;
                info!("batch flushing stopped");
                return;
            }
            signal = signal_rx.recv() => {
                if signal.is_none() {
                    info!("flush signal channel closed");
                    return;
                }
                dispatch_once(&batcher, workers.as_deref(), writer.as_ref(), &tracker).await;
            }
        }
    }
}

async fn dispatch_once(
    batcher: &Batcher,
    workers: Option<&FlushWorkerPool>,
    writer: &dyn Writer,
    tracker: &OffsetTracker,
) {
    let batch = batcher.flush();
    if batch.is_empty() {
        return;
    }

    info!(
        rows = batch.len(),
        bytes = batch.estimated_bytes,
        "flushing batch"
    );

    match workers {
        Some(pool) => {
            pool.submit(batch).await;
            BATCH_FLUSH_TOTAL.with_label_values(&["submitted"]).inc();
        }
        None => {
            write_batch(writer, tracker, batch).await;
        }
    }
}
