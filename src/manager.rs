//! Connection lifecycle management.
//!
//! The [`ConnectionManager`] runs as a background task for the process
//! lifetime and keeps exactly one live connection available to all
//! collectors, retrying indefinitely on failure. The first successful
//! connection creates and registers one collector per configured metric;
//! every later one is swapped into the existing collectors. Any query
//! failure reported through the error sink discards the current connection
//! and opens a brand-new one, since a failing query is a strong signal the
//! shared connection itself is degraded.

use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorError, QueryCollector};
use crate::config::MetricSpec;
use crate::metrics::ExporterMetrics;
use crate::mongo::{Connection, Connector};
use crate::sink::{ErrorSink, QueryFailure, ERROR_CHANNEL_CAPACITY};

/// Delay between connection attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Collectors registered so far, shared with the scrape handler.
pub type SharedCollectors = Arc<RwLock<Vec<Arc<QueryCollector>>>>;

/// The currently bound connection, shared with the readiness probe.
pub type ConnectionSlot = Arc<RwLock<Option<Arc<dyn Connection>>>>;

/// Manager lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Owns the reconnect loop and the collector set.
pub struct ConnectionManager {
    specs: Vec<MetricSpec>,
    connector: Arc<dyn Connector>,
    registry: Registry,
    metrics: ExporterMetrics,
    collectors: SharedCollectors,
    current: ConnectionSlot,
    sink: ErrorSink,
    failures: mpsc::Receiver<QueryFailure>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("specs", &self.specs.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        specs: Vec<MetricSpec>,
        connector: Arc<dyn Connector>,
        registry: Registry,
        metrics: ExporterMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        let (sink, failures) = ErrorSink::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            specs,
            connector,
            registry,
            metrics,
            collectors: Arc::new(RwLock::new(Vec::new())),
            current: Arc::new(RwLock::new(None)),
            sink,
            failures,
            shutdown,
        }
    }

    /// Handle to the collector set, for the scrape handler.
    pub fn collectors(&self) -> SharedCollectors {
        Arc::clone(&self.collectors)
    }

    /// Handle to the current connection, for the readiness probe.
    pub fn connection_slot(&self) -> ConnectionSlot {
        Arc::clone(&self.current)
    }

    /// Drive the reconnect loop until shutdown.
    pub async fn run(mut self) {
        let mut state = ManagerState::Disconnected;
        loop {
            state = match state {
                ManagerState::Disconnected => ManagerState::Connecting,
                ManagerState::Connecting => self.connect().await,
                ManagerState::Connected => self.wait_for_failure().await,
                ManagerState::ShuttingDown => {
                    tracing::info!("Connection manager stopped");
                    return;
                }
            };
        }
    }

    async fn connect(&self) -> ManagerState {
        if self.shutdown.is_cancelled() {
            return ManagerState::ShuttingDown;
        }

        match self.connector.connect().await {
            Ok(connection) => match self.bind_connection(connection).await {
                Ok(()) => ManagerState::Connected,
                Err(error) => {
                    // Registration failures are configuration-class and will
                    // not improve with retries; take the process down.
                    tracing::error!(error = %error, "Failed to register collectors, shutting down");
                    self.shutdown.cancel();
                    ManagerState::ShuttingDown
                }
            },
            Err(error) => {
                tracing::info!(
                    error = %error,
                    retry_in = ?RETRY_DELAY,
                    "Error during connection creation, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_DELAY) => ManagerState::Connecting,
                    _ = self.shutdown.cancelled() => ManagerState::ShuttingDown,
                }
            }
        }
    }

    /// Hand a fresh connection to the collector set.
    ///
    /// First success creates and registers all collectors; later ones
    /// write-swap the connection into each existing collector in turn.
    async fn bind_connection(&self, connection: Arc<dyn Connection>) -> Result<(), CollectorError> {
        let mut collectors = self.collectors.write().await;
        if collectors.is_empty() {
            for spec in &self.specs {
                let collector = Arc::new(QueryCollector::new(
                    spec.clone(),
                    Some(Arc::clone(&connection)),
                    self.sink.clone(),
                    self.metrics.clone(),
                )?);
                collector.register(&self.registry)?;
                tracing::info!(metric = %collector.name(), "Registered collector");
                collectors.push(collector);
            }
        } else {
            for collector in collectors.iter() {
                tracing::info!(metric = %collector.name(), "Updating collector connection");
                collector.update_connection(Arc::clone(&connection)).await;
            }
        }
        drop(collectors);

        *self.current.write().await = Some(connection);
        self.metrics.set_connected(true);
        tracing::info!("Connected");
        Ok(())
    }

    /// Block until a collector reports a failure or shutdown is requested.
    async fn wait_for_failure(&mut self) -> ManagerState {
        tokio::select! {
            failure = self.failures.recv() => match failure {
                Some(failure) => {
                    tracing::error!(
                        metric = %failure.collector,
                        error = %failure.error,
                        "Collector reported failure, reconnecting"
                    );
                    // Discard the current connection; a brand-new one is
                    // opened rather than repairing the old.
                    *self.current.write().await = None;
                    self.metrics.set_connected(false);
                    ManagerState::Connecting
                }
                // All sinks dropped; nothing can report errors anymore.
                None => ManagerState::ShuttingDown,
            },
            _ = self.shutdown.cancelled() => ManagerState::ShuttingDown,
        }
    }
}
