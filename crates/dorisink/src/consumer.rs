//! Kafka consumption.
//!
//! A poll loop drains the broker into a bounded in-process channel; a
//! commit loop periodically advances the group's committed offsets. Auto
//! commit is disabled: the only offsets ever committed are the ones the
//! flush path marked *after* Doris acknowledged the batch containing them,
//! which is what makes redelivery after a crash an at-least-once story
//! rather than a data-loss story.
//!
//! Back-pressure: the message channel is bounded, the poll loop's `send`
//! blocks when it is full, and a blocked poll loop stops pulling from the
//! broker. Nothing is dropped anywhere on this path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as RdKafkaConsumer, StreamConsumer};
use rdkafka::message::Message as RdKafkaMessage;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dorisink_core::{Result, SinkError};
use dorisink_observability::metrics::KAFKA_CONSUME_ERRORS;

use crate::config::KafkaConfig;

/// One record pulled from the broker.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: i64,
}

/// Shared map of the highest write-acknowledged offset per partition.
///
/// The flush path calls [`OffsetTracker::mark`] after a successful Stream
/// Load; the consumer's commit loop drains it with [`OffsetTracker::take`].
#[derive(Clone, Default)]
pub struct OffsetTracker {
    inner: Arc<Mutex<HashMap<i32, i64>>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `offset` as safe to commit for `partition`. Keeps the max,
    /// so out-of-order acknowledgements from concurrent flush workers
    /// cannot move the commit point backwards.
    pub fn mark(&self, partition: i32, offset: i64) {
        let mut inner = self.inner.lock().expect("offset tracker lock poisoned");
        inner
            .entry(partition)
            .and_modify(|o| *o = (*o).max(offset))
            .or_insert(offset);
    }

    /// Drain all marked offsets.
    pub fn take(&self) -> HashMap<i32, i64> {
        std::mem::take(&mut *self.inner.lock().expect("offset tracker lock poisoned"))
    }

    /// Peek without draining.
    pub fn snapshot(&self) -> HashMap<i32, i64> {
        self.inner
            .lock()
            .expect("offset tracker lock poisoned")
            .clone()
    }
}

/// Source of messages for the pipeline.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Verify connectivity and start the internal loops.
    async fn start(&self, token: CancellationToken) -> Result<()>;

    /// Take the receiving end of the message channel. Yields `Some` exactly
    /// once; the pipeline's process loop is the single consumer.
    fn take_messages(&self) -> Option<mpsc::Receiver<Message>>;

    /// Handle used to mark offsets safe to commit.
    fn offset_tracker(&self) -> OffsetTracker;

    /// Final commit and teardown.
    async fn close(&self);
}

/// `rdkafka`-backed consumer.
pub struct KafkaConsumer {
    cfg: KafkaConfig,
    client: Arc<StreamConsumer>,
    msg_tx: mpsc::Sender<Message>,
    msg_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    tracker: OffsetTracker,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl KafkaConsumer {
    /// Build the client and subscribe. No network traffic happens until
    /// [`Consumer::start`].
    pub fn new(cfg: KafkaConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set(
                "auto.offset.reset",
                if cfg.from_earliest { "earliest" } else { "latest" },
            )
            .set(
                "session.timeout.ms",
                (cfg.session_timeout_secs * 1000).to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                (cfg.heartbeat_interval_secs * 1000).to_string(),
            )
            .set("fetch.max.bytes", cfg.max_fetch_bytes.to_string())
            .set("client.id", "dorisink");

        let client: StreamConsumer = client_config
            .create()
            .map_err(|e| SinkError::KafkaConnect(format!("failed to create kafka client: {}", e)))?;

        client
            .subscribe(&[&cfg.topic])
            .map_err(|e| SinkError::KafkaConnect(format!("failed to subscribe: {}", e)))?;

        info!(
            brokers = ?cfg.brokers,
            topic = %cfg.topic,
            group_id = %cfg.group_id,
            "kafka consumer created"
        );

        let (msg_tx, msg_rx) = mpsc::channel(cfg.max_fetch_records);

        Ok(Self {
            cfg,
            client: Arc::new(client),
            msg_tx,
            msg_rx: Mutex::new(Some(msg_rx)),
            tracker: OffsetTracker::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn start(&self, token: CancellationToken) -> Result<()> {
        // Metadata fetch doubles as a connectivity check, the moral
        // equivalent of a ping. It is a blocking librdkafka call.
        let client = self.client.clone();
        let topic = self.cfg.topic.clone();
        tokio::task::spawn_blocking(move || {
            client.fetch_metadata(Some(&topic), Duration::from_secs(10))
        })
        .await
        .map_err(|e| SinkError::KafkaConnect(format!("metadata task failed: {}", e)))?
        .map_err(|e| SinkError::KafkaConnect(format!("failed to reach kafka: {}", e)))?;

        info!("kafka consumer started");

        let poll = tokio::spawn(poll_loop(
            self.client.clone(),
            self.cfg.topic.clone(),
            self.msg_tx.clone(),
            token.clone(),
        ));
        let commit = tokio::spawn(commit_loop(
            self.client.clone(),
            self.cfg.topic.clone(),
            self.tracker.clone(),
            token,
        ));

        let mut handles = self.handles.lock().expect("consumer lock poisoned");
        handles.push(poll);
        handles.push(commit);

        Ok(())
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.msg_rx.lock().expect("consumer lock poisoned").take()
    }

    fn offset_tracker(&self) -> OffsetTracker {
        self.tracker.clone()
    }

    async fn close(&self) {
        // One synchronous commit for anything the flush path marked after
        // the commit loop's last tick.
        let client = self.client.clone();
        let topic = self.cfg.topic.clone();
        let tracker = self.tracker.clone();
        let _ = tokio::task::spawn_blocking(move || {
            commit_tracked(&client, &topic, &tracker, CommitMode::Sync);
        })
        .await;

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("consumer lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }

        info!("kafka consumer closed");
    }
}

async fn poll_loop(
    client: Arc<StreamConsumer>,
    topic: String,
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("consume loop stopped");
                return;
            }
            result = client.recv() => match result {
                Ok(record) => {
                    let message = Message {
                        topic: record.topic().to_string(),
                        partition: record.partition(),
                        offset: record.offset(),
                        key: record.key().map(Bytes::copy_from_slice),
                        value: record
                            .payload()
                            .map(Bytes::copy_from_slice)
                            .unwrap_or_default(),
                        timestamp: record.timestamp().to_millis().unwrap_or(0),
                    };

                    // Blocking send: a full channel stalls polling, which
                    // pauses broker delivery instead of dropping records.
                    if tx.send(message).await.is_err() {
                        info!("message channel closed, stopping consume loop");
                        return;
                    }
                }
                Err(e) => {
                    error!(error = %e, "fetch error");
                    KAFKA_CONSUME_ERRORS
                        .with_label_values(&[topic.as_str(), "fetch_error"])
                        .inc();
                }
            }
        }
    }
}

async fn commit_loop(
    client: Arc<StreamConsumer>,
    topic: String,
    tracker: OffsetTracker,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("commit loop stopped");
                return;
            }
            _ = ticker.tick() => {
                commit_tracked(&client, &topic, &tracker, CommitMode::Async);
            }
        }
    }
}

/// Commit every tracked offset, advancing the group position to one past
/// the last acknowledged record.
fn commit_tracked(
    client: &StreamConsumer,
    topic: &str,
    tracker: &OffsetTracker,
    mode: CommitMode,
) {
    let offsets = tracker.take();
    if offsets.is_empty() {
        return;
    }

    let mut tpl = TopicPartitionList::new();
    for (partition, offset) in &offsets {
        if let Err(e) = tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1)) {
            warn!(partition, offset, error = %e, "cannot stage offset for commit");
        }
    }

    match client.commit(&tpl, mode) {
        Ok(()) => {
            info!(partitions = offsets.len(), "offsets committed");
        }
        Err(e) => {
            let err = SinkError::KafkaCommit(format!("failed to commit offsets: {}", e));
            error!(error = %err, code = err.code(), "offset commit failed");
            KAFKA_CONSUME_ERRORS
                .with_label_values(&[topic, "commit_error"])
                .inc();
            // Put the offsets back so the next tick retries the commit.
            for (partition, offset) in offsets {
                tracker.mark(partition, offset);
            }
        }
    }
}
