//! End-to-end pipeline tests with mock consumer and writer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dorisink::batcher::Batcher;
use dorisink::config::BatchConfig;
use dorisink::consumer::{Consumer, Message, OffsetTracker};
use dorisink::mapper::Mapper;
use dorisink::pipeline::Pipeline;
use dorisink::writer::{StreamLoadReport, Writer};
use dorisink_core::{CellValue, Column, ColumnType, Result, Row, Schema};

/// Consumer fed from a pre-seeded channel; the sender stays alive so the
/// pipeline only exits via cancellation, as in production.
struct ScriptedConsumer {
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    seed_capacity: usize,
    tracker: OffsetTracker,
}

impl ScriptedConsumer {
    fn new(messages: Vec<Message>) -> Arc<Self> {
        let seed_capacity = messages.len().max(1) + 16;
        let (tx, rx) = mpsc::channel(seed_capacity);
        for msg in messages {
            tx.try_send(msg).expect("seed channel overflow");
        }
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            seed_capacity,
            tracker: OffsetTracker::new(),
        })
    }

    /// True once the pipeline has received every seeded message.
    fn drained(&self) -> bool {
        self.tx.capacity() == self.seed_capacity
    }
}

#[async_trait]
impl Consumer for ScriptedConsumer {
    async fn start(&self, _token: CancellationToken) -> Result<()> {
        Ok(())
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().unwrap().take()
    }

    fn offset_tracker(&self) -> OffsetTracker {
        self.tracker.clone()
    }

    async fn close(&self) {}
}

/// Writer that records every batch it is handed.
#[derive(Default)]
struct CapturingWriter {
    batches: Mutex<Vec<Vec<Row>>>,
}

impl CapturingWriter {
    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn total_rows(&self) -> usize {
        self.batches.lock().unwrap().iter().map(|b| b.len()).sum()
    }
}

#[async_trait]
impl Writer for CapturingWriter {
    async fn write(&self, rows: &[Row]) -> Result<StreamLoadReport> {
        self.batches.lock().unwrap().push(rows.to_vec());
        Ok(StreamLoadReport {
            loaded_rows: rows.len() as i64,
            ..StreamLoadReport::default()
        })
    }

    async fn close(&self) {}
}

fn event_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("name", ColumnType::Varchar),
        ])
        .unwrap(),
    )
}

fn message(partition: i32, offset: i64, payload: &str) -> Message {
    Message {
        topic: "events".to_string(),
        partition,
        offset,
        key: None,
        value: Bytes::copy_from_slice(payload.as_bytes()),
        timestamp: 1_700_000_000_000,
    }
}

fn batch_cfg(max_rows: usize, interval_secs: u64, workers: usize) -> BatchConfig {
    BatchConfig {
        max_batch_rows: max_rows,
        max_batch_size: 10 * 1024 * 1024,
        max_batch_interval_secs: interval_secs,
        flush_worker_count: workers,
    }
}

fn build_pipeline(
    consumer: Arc<ScriptedConsumer>,
    writer: Arc<CapturingWriter>,
    cfg: &BatchConfig,
) -> (Arc<Pipeline>, CancellationToken) {
    let (batcher, signal_rx) = Batcher::new(cfg);
    let token = CancellationToken::new();
    let pipeline = Pipeline::new(
        consumer,
        Mapper::new(event_schema()),
        batcher,
        signal_rx,
        writer,
        cfg.flush_worker_count,
        token.clone(),
    );
    (Arc::new(pipeline), token)
}

/// Poll until `check` holds or ~5 simulated seconds pass.
async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_single_row_single_flush() {
    let consumer = ScriptedConsumer::new(vec![message(0, 7, r#"{"id":7,"name":"alpha"}"#)]);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) = build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(1, 3600, 0));

    pipeline.start().await.unwrap();
    assert!(wait_until(|| writer.batch_count() == 1).await);

    {
        let batches = writer.batches.lock().unwrap();
        assert_eq!(
            batches[0],
            vec![vec![CellValue::Int(7), CellValue::Str("alpha".into())]]
        );
    }

    // The write was acknowledged, so offset 7 is marked safe to commit.
    assert!(wait_until(|| consumer.tracker.snapshot().get(&0) == Some(&7)).await);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_time_based_flush_collects_pending_rows() {
    let consumer = ScriptedConsumer::new(vec![
        message(0, 0, r#"{"id":1,"name":"a"}"#),
        message(0, 1, r#"{"id":2,"name":"b"}"#),
        message(0, 2, r#"{"id":3,"name":"c"}"#),
    ]);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) =
        build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(100, 2, 0));

    pipeline.start().await.unwrap();

    // Nothing flushes before the interval expires...
    assert!(wait_until(|| writer.batch_count() >= 1).await);

    // ...and exactly one batch carries all three rows.
    assert_eq!(writer.batch_count(), 1);
    assert_eq!(writer.total_rows(), 3);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_missing_field_degrades_to_zero_value() {
    let consumer = ScriptedConsumer::new(vec![message(0, 0, r#"{"id":42}"#)]);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) = build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(1, 3600, 0));

    pipeline.start().await.unwrap();
    assert!(wait_until(|| writer.batch_count() == 1).await);

    let batches = writer.batches.lock().unwrap();
    assert_eq!(
        batches[0],
        vec![vec![CellValue::Int(42), CellValue::Str("".into())]]
    );
    drop(batches);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown_flushes_tail() {
    // No trigger fires: thresholds are far away and the interval is long.
    let consumer = ScriptedConsumer::new(vec![
        message(0, 0, r#"{"id":1,"name":"a"}"#),
        message(0, 1, r#"{"id":2,"name":"b"}"#),
        message(1, 5, r#"{"id":3,"name":"c"}"#),
    ]);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) =
        build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(100, 3600, 0));

    pipeline.start().await.unwrap();

    // Let the process loop drain the channel into the batcher.
    assert!(wait_until(|| consumer.drained()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(writer.batch_count(), 0);

    // Shutdown performs the final flush-and-write pass.
    pipeline.stop().await;

    assert_eq!(writer.batch_count(), 1);
    assert_eq!(writer.total_rows(), 3);
    let offsets = consumer.tracker.snapshot();
    assert_eq!(offsets.get(&0), Some(&1));
    assert_eq!(offsets.get(&1), Some(&5));
}

#[tokio::test]
async fn test_worker_pool_path_writes_everything() {
    let messages: Vec<Message> = (0..10)
        .map(|i| message(0, i, &format!(r#"{{"id":{},"name":"n{}"}}"#, i, i)))
        .collect();
    let consumer = ScriptedConsumer::new(messages);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) = build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(1, 3600, 2));

    pipeline.start().await.unwrap();
    assert!(wait_until(|| writer.total_rows() == 10).await);

    pipeline.stop().await;

    assert_eq!(writer.total_rows(), 10);
    // Highest acknowledged offset wins.
    assert_eq!(consumer.tracker.snapshot().get(&0), Some(&9));
}

#[tokio::test]
async fn test_malformed_records_still_flow() {
    let consumer = ScriptedConsumer::new(vec![
        message(0, 0, "not json"),
        message(0, 1, r#"{"id":"wrong type","name":77}"#),
        message(0, 2, r#"{"id":5,"name":"ok"}"#),
    ]);
    let writer = Arc::new(CapturingWriter::default());
    let (pipeline, _token) = build_pipeline(consumer.clone(), writer.clone(), &batch_cfg(3, 3600, 0));

    pipeline.start().await.unwrap();
    assert!(wait_until(|| writer.batch_count() == 1).await);

    let batches = writer.batches.lock().unwrap();
    assert_eq!(
        batches[0],
        vec![
            vec![CellValue::Int(0), CellValue::Str("".into())],
            vec![CellValue::Int(0), CellValue::Str("".into())],
            vec![CellValue::Int(5), CellValue::Str("ok".into())],
        ]
    );
    drop(batches);

    pipeline.stop().await;
}
