//! Exporter self-instrumentation.
//!
//! Meta-metrics about the exporter itself, exposed on the same registry as
//! the configured query metrics: query latency and error counters per
//! metric, and the current connection status.

use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};

/// Handles to the exporter's own metrics. Cheap to clone; all handles share
/// the underlying series.
#[derive(Clone)]
pub struct ExporterMetrics {
    query_duration: HistogramVec,
    query_errors: CounterVec,
    samples_collected: CounterVec,
    connection_status: IntGauge,
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics").finish_non_exhaustive()
    }
}

impl ExporterMetrics {
    /// Create the metric families and register them.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let query_duration = HistogramVec::new(
            HistogramOpts::new(
                "mongodb_exporter_query_duration_seconds",
                "Duration of MongoDB queries in seconds",
            ),
            &["metric_name", "db", "collection", "query_type"],
        )?;
        let query_errors = CounterVec::new(
            Opts::new(
                "mongodb_exporter_query_errors_total",
                "Total number of MongoDB query errors",
            ),
            &["metric_name", "db", "collection", "error_type"],
        )?;
        let samples_collected = CounterVec::new(
            Opts::new(
                "mongodb_exporter_samples_collected_total",
                "Total number of samples successfully collected",
            ),
            &["metric_name"],
        )?;
        let connection_status = IntGauge::new(
            "mongodb_exporter_connection_status",
            "MongoDB connection status (1=connected, 0=disconnected)",
        )?;

        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(query_errors.clone()))?;
        registry.register(Box::new(samples_collected.clone()))?;
        registry.register(Box::new(connection_status.clone()))?;

        Ok(Self {
            query_duration,
            query_errors,
            samples_collected,
            connection_status,
        })
    }

    /// Create the metric families without registering them (for tests).
    #[cfg(test)]
    pub(crate) fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("failed to build exporter metrics")
    }

    pub fn observe_query(
        &self,
        metric_name: &str,
        db: &str,
        collection: &str,
        query_type: &str,
        seconds: f64,
    ) {
        self.query_duration
            .with_label_values(&[metric_name, db, collection, query_type])
            .observe(seconds);
    }

    pub fn inc_query_error(&self, metric_name: &str, db: &str, collection: &str, kind: &str) {
        self.query_errors
            .with_label_values(&[metric_name, db, collection, kind])
            .inc();
    }

    pub fn add_samples_collected(&self, metric_name: &str, count: usize) {
        self.samples_collected
            .with_label_values(&[metric_name])
            .inc_by(count as f64);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connection_status.set(i64::from(connected));
    }
}
