//! dorisink - a streaming ingestion sink from Kafka to Apache Doris.
//!
//! Consumes JSON records from a Kafka topic, maps each record onto the
//! target table's schema, accumulates rows into size/time/count bounded
//! batches, and bulk-loads batches through Doris's Stream Load HTTP
//! endpoint. Delivery is at-least-once: offsets are only committed after
//! the batch containing them was acknowledged by Doris.
//!
//! See the `dorisink` binary for the assembled service; the modules here
//! are the pieces it wires together.

pub mod batcher;
pub mod config;
pub mod consumer;
pub mod flush_worker;
pub mod mapper;
pub mod pipeline;
pub mod schema_fetch;
pub mod server;
pub mod writer;

pub use batcher::{Batch, Batcher};
pub use config::Config;
pub use consumer::{Consumer, KafkaConsumer, Message, OffsetTracker};
pub use flush_worker::FlushWorkerPool;
pub use mapper::Mapper;
pub use pipeline::Pipeline;
pub use writer::{StreamLoadWriter, Writer};
