//! MongoDB query exporter.
//!
//! Executes configured read queries against MongoDB on every Prometheus
//! scrape and republishes selected result fields as gauge samples. The
//! exporter stays available while the database is unreachable: a background
//! connection manager retries indefinitely and swaps fresh connections into
//! the collectors, and scrapes are bounded so they never block on database
//! latency indefinitely.
//!
//! # Architecture
//!
//! - **config**: YAML configuration and load-time validation
//! - **mongo**: driver access behind capability traits ([`mongo::Connection`],
//!   [`mongo::Cursor`]), swappable for fakes in tests
//! - **collector**: one [`QueryCollector`] per metric, query + extraction
//! - **metrics**: the exporter's own instrumentation (query latency, errors,
//!   connection status)
//! - **sink**: bounded, non-blocking error channel back to the manager
//! - **manager**: the reconnect loop that owns the collector set
//! - **server**: Axum router with the scrape endpoint and health probes

pub mod collector;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod mongo;
pub mod server;
pub mod sink;

pub use collector::{CollectorError, QueryCollector};
pub use config::{AppConfig, ConfigError, MetricSpec};
pub use manager::ConnectionManager;
pub use metrics::ExporterMetrics;
pub use sink::ErrorSink;
