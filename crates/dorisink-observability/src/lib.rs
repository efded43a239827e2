//! dorisink Observability
//!
//! Prometheus metric definitions and the admin HTTP surface for the
//! ingestion pipeline.
//!
//! # Features
//!
//! - Prometheus metrics export
//! - Health and readiness endpoints
//!
//! # Usage
//!
//! ```no_run
//! use dorisink_observability::{exporter, metrics};
//!
//! // Initialize metrics
//! metrics::init();
//!
//! // Create the admin router
//! let readiness = exporter::Readiness::new();
//! let router = exporter::create_admin_router(readiness);
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::{create_admin_router, Readiness};
pub use metrics::{init as init_metrics, REGISTRY};
