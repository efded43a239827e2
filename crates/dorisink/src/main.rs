//! dorisink service binary.
//!
//! Startup sequence: configuration → logging → metrics → schema →
//! consumer/batcher/writer → pipeline → admin server, then park until a
//! shutdown signal arrives and unwind in reverse under a 30 second bound.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use dorisink::batcher::Batcher;
use dorisink::config::{Config, SchemaMode};
use dorisink::consumer::KafkaConsumer;
use dorisink::mapper::Mapper;
use dorisink::pipeline::Pipeline;
use dorisink::schema_fetch;
use dorisink::server::serve_admin;
use dorisink::writer::StreamLoadWriter;
use dorisink_observability::Readiness;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a graceful shutdown may take before the process gives up.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about = "Kafka to Apache Doris ingestion sink")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "configs/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| cfg.log.level.clone())
        .parse()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to init logging: {}", e);
        std::process::exit(1);
    }

    info!(version = VERSION, config = %cfg, "dorisink starting");

    dorisink_observability::init_metrics();

    let token = CancellationToken::new();

    // Schema is fixed for the life of the process.
    let schema = match cfg.schema.mode {
        SchemaMode::Auto => {
            info!("fetching schema from doris");
            schema_fetch::fetch_from_doris(&cfg.doris).await
        }
        SchemaMode::Manual => {
            info!("loading schema from config");
            schema_fetch::schema_from_config(&cfg.schema.manual)
        }
    };
    let schema = match schema {
        Ok(schema) => Arc::new(schema),
        Err(e) => {
            error!(error = %e, code = e.code(), "failed to initialize schema");
            std::process::exit(1);
        }
    };
    info!(columns = schema.column_count(), "schema initialized");

    let mapper = Mapper::new(schema.clone());

    let consumer = match KafkaConsumer::new(cfg.kafka.clone()) {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            error!(error = %e, code = e.code(), "failed to create kafka consumer");
            std::process::exit(1);
        }
    };

    let (batcher, flush_signal) = Batcher::new(&cfg.batch);

    let writer = match StreamLoadWriter::new(
        cfg.doris.clone(),
        schema.column_names(),
        token.clone(),
    ) {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!(error = %e, code = e.code(), "failed to create stream load writer");
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(Pipeline::new(
        consumer,
        mapper,
        batcher,
        flush_signal,
        writer,
        cfg.batch.flush_worker_count,
        token.clone(),
    ));

    let readiness = Readiness::new();
    if cfg.metrics.enabled {
        let readiness = readiness.clone();
        let token = token.clone();
        let port = cfg.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = serve_admin(port, readiness, token).await {
                error!(error = %e, "admin server error");
            }
        });
    }

    if let Err(e) = pipeline.start().await {
        error!(error = %e, code = e.code(), "failed to start pipeline");
        std::process::exit(1);
    }
    readiness.mark_ready();

    info!("dorisink started successfully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    info!("shutting down gracefully");

    let stopping = {
        let pipeline = pipeline.clone();
        async move { pipeline.stop().await }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, stopping).await.is_err() {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "shutdown timed out, exiting anyway"
        );
    }

    info!("dorisink stopped");
}
