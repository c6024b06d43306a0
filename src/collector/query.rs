//! Per-metric query collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use prometheus::{GaugeVec, Opts, Registry};
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::config::{MetricSpec, QueryBody};
use crate::metrics::ExporterMetrics;
use crate::mongo::{Connection, Cursor};
use crate::sink::ErrorSink;

use super::{extract, CollectorError, COLLECT_TIMEOUT};

/// One decoded result document, ready for publication.
struct Sample {
    value: f64,
    labels: Vec<String>,
}

/// Executes one configured query per scrape and republishes the result
/// documents as gauge samples.
///
/// The collector is long-lived: it is registered once and survives
/// connection replacement. The bound connection is snapshotted under a read
/// lock at the start of each attempt, so replacement never aborts an
/// in-flight query.
pub struct QueryCollector {
    spec: MetricSpec,
    gauge: GaugeVec,
    /// Source document field per dynamic label, aligned with the gauge's
    /// variable label order.
    label_fields: Vec<String>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    sink: ErrorSink,
    metrics: ExporterMetrics,
}

impl std::fmt::Debug for QueryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCollector")
            .field("metric", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl QueryCollector {
    /// Build the collector and its gauge family from a spec.
    ///
    /// # Errors
    /// Returns `CollectorError::Registration` if the metric descriptor is
    /// rejected (invalid name or labels).
    pub fn new(
        spec: MetricSpec,
        connection: Option<Arc<dyn Connection>>,
        sink: ErrorSink,
        metrics: ExporterMetrics,
    ) -> Result<Self, CollectorError> {
        let label_names: Vec<&str> = spec.tag_attributes.keys().map(String::as_str).collect();
        let label_fields: Vec<String> = spec.tag_attributes.values().cloned().collect();

        // The exposition library rejects empty help strings.
        let help = if spec.help.trim().is_empty() {
            spec.name.clone()
        } else {
            spec.help.clone()
        };
        let const_labels: HashMap<String, String> = spec
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let opts = Opts::new(spec.name.clone(), help).const_labels(const_labels);
        let gauge = GaugeVec::new(opts, &label_names)
            .map_err(|e| CollectorError::Registration(e.to_string()))?;

        Ok(Self {
            spec,
            gauge,
            label_fields,
            connection: RwLock::new(connection),
            sink,
            metrics,
        })
    }

    /// Exported metric name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The spec this collector was built from.
    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    /// Register the gauge family with the exposition registry.
    ///
    /// This is the static descriptor handshake: name, help and label names
    /// are validated before the first collection.
    pub fn register(&self, registry: &Registry) -> Result<(), CollectorError> {
        registry
            .register(Box::new(self.gauge.clone()))
            .map_err(|e| CollectorError::Registration(e.to_string()))
    }

    /// Replace the bound connection.
    ///
    /// Safe to call concurrently with any number of in-flight collection
    /// attempts; those keep using the snapshot they took at start.
    pub async fn update_connection(&self, connection: Arc<dyn Connection>) {
        *self.connection.write().await = Some(connection);
    }

    /// Run one collection attempt and publish its samples.
    ///
    /// Failures are logged and reported to the error sink; the returned
    /// error is informational for callers and must not fail a scrape.
    pub async fn collect(&self) -> Result<usize, CollectorError> {
        let snapshot = self.connection.read().await.clone();
        let Some(connection) = snapshot else {
            self.publish(&[]);
            return Err(self.fail(CollectorError::NoConnection));
        };

        let start = Instant::now();
        let (samples, error) = match timeout(COLLECT_TIMEOUT, self.execute(connection)).await {
            Ok(outcome) => outcome,
            Err(_) => (Vec::new(), Some(CollectorError::Timeout(COLLECT_TIMEOUT))),
        };
        self.metrics.observe_query(
            &self.spec.name,
            &self.spec.db,
            &self.spec.collection,
            self.query_type(),
            start.elapsed().as_secs_f64(),
        );

        self.publish(&samples);
        match error {
            Some(error) => Err(self.fail(error)),
            None => {
                tracing::debug!(metric = %self.spec.name, samples = samples.len(), "Collection succeeded");
                self.metrics
                    .add_samples_collected(&self.spec.name, samples.len());
                Ok(samples.len())
            }
        }
    }

    fn query_type(&self) -> &'static str {
        match self.spec.query_body() {
            Some(QueryBody::Aggregate(_)) => "aggregate",
            _ => "find",
        }
    }

    /// Execute the query and gather samples.
    ///
    /// Returns the gathered samples plus the error that ended the attempt,
    /// if any. A decode or extraction failure voids the batch; an iteration
    /// failure keeps the documents already gathered. The cursor is owned
    /// here and dropped on every path.
    async fn execute(
        &self,
        connection: Arc<dyn Connection>,
    ) -> (Vec<Sample>, Option<CollectorError>) {
        let mut cursor = match self.open_cursor(connection.as_ref()).await {
            Ok(cursor) => cursor,
            Err(error) => return (Vec::new(), Some(error)),
        };

        let mut samples = Vec::new();
        loop {
            match cursor.advance().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => return (samples, Some(error.into())),
            }

            let document = match cursor.decode_current() {
                Ok(document) => document,
                // A decode failure likely indicates a schema mismatch that
                // will repeat; void the whole attempt instead of skipping.
                Err(error) => return (Vec::new(), Some(error.into())),
            };

            let sample = match self.sample(&document) {
                Ok(sample) => sample,
                Err(error) => return (Vec::new(), Some(error)),
            };
            samples.push(sample);
        }

        (samples, None)
    }

    async fn open_cursor(
        &self,
        connection: &dyn Connection,
    ) -> Result<Box<dyn Cursor>, CollectorError> {
        match self.spec.query_body() {
            Some(QueryBody::Aggregate(pipeline)) => connection
                .aggregate(&self.spec.db, &self.spec.collection, pipeline)
                .await
                .map_err(Into::into),
            Some(QueryBody::Find(filter)) => connection
                .find(&self.spec.db, &self.spec.collection, filter)
                .await
                .map_err(Into::into),
            None => Err(CollectorError::MissingQuery(self.spec.name.clone())),
        }
    }

    fn sample(&self, document: &bson::Document) -> Result<Sample, CollectorError> {
        let value = extract::metric_value(document, &self.spec.metrics_attribute)?;
        let labels = extract::tag_values(document, &self.label_fields)?;
        Ok(Sample { value, labels })
    }

    /// Swap the published samples for this metric family.
    fn publish(&self, samples: &[Sample]) {
        self.gauge.reset();
        for sample in samples {
            let labels: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
            self.gauge.with_label_values(&labels).set(sample.value);
        }
    }

    fn fail(&self, error: CollectorError) -> CollectorError {
        tracing::error!(metric = %self.spec.name, error = %error, "Collection failed");
        self.metrics.inc_query_error(
            &self.spec.name,
            &self.spec.db,
            &self.spec.collection,
            error.kind(),
        );
        self.sink.report(&self.spec.name, error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongo::fake::{FakeConnection, FakeStep};
    use crate::mongo::QueryError;
    use crate::sink::QueryFailure;
    use bson::doc;
    use prometheus::core::Collector as _;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn test_spec() -> MetricSpec {
        MetricSpec {
            name: "orders_total".to_string(),
            help: "Number of orders".to_string(),
            db: "shop".to_string(),
            collection: "orders".to_string(),
            tags: BTreeMap::from([("source".to_string(), "shop".to_string())]),
            find: Some("{}".to_string()),
            aggregate: None,
            metrics_attribute: "count".to_string(),
            tag_attributes: BTreeMap::from([("region".to_string(), "region_code".to_string())]),
        }
    }

    fn test_collector(
        spec: MetricSpec,
        connection: Option<Arc<dyn Connection>>,
    ) -> (QueryCollector, mpsc::Receiver<QueryFailure>) {
        let (sink, rx) = ErrorSink::channel(10);
        let collector =
            QueryCollector::new(spec, connection, sink, ExporterMetrics::unregistered()).unwrap();
        (collector, rx)
    }

    fn published_count(collector: &QueryCollector) -> usize {
        collector.gauge.collect()[0].get_metric().len()
    }

    #[tokio::test]
    async fn test_collect_empty_result() {
        let connection = Arc::new(FakeConnection::new().with_docs(Vec::new()));
        let (collector, mut rx) = test_collector(test_spec(), Some(connection.clone()));

        assert_eq!(collector.collect().await.unwrap(), 0);
        assert_eq!(published_count(&collector), 0);
        assert!(rx.try_recv().is_err());

        let calls = connection.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, "find");
        assert_eq!(calls[0].db, "shop");
        assert_eq!(calls[0].collection, "orders");
        assert_eq!(calls[0].body, "{}");
    }

    #[tokio::test]
    async fn test_collect_emits_one_sample_per_document() {
        let connection = Arc::new(FakeConnection::new().with_docs(vec![
            doc! { "count": 5_i64, "region_code": "eu" },
            doc! { "count": 3.0, "region_code": "us" },
        ]));
        let (collector, mut rx) = test_collector(test_spec(), Some(connection));

        assert_eq!(collector.collect().await.unwrap(), 2);
        assert_eq!(published_count(&collector), 2);
        assert_eq!(collector.gauge.with_label_values(&["eu"]).get(), 5.0);
        assert_eq!(collector.gauge.with_label_values(&["us"]).get(), 3.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_collect_aggregate_dispatch() {
        let mut spec = test_spec();
        spec.find = None;
        spec.aggregate =
            Some(r#"[{"$group": {"_id": "$deliverer", "count": {"$sum": "$qty"}}}]"#.to_string());

        let connection = Arc::new(FakeConnection::new().with_docs(Vec::new()));
        let (collector, _rx) = test_collector(spec, Some(connection.clone()));

        collector.collect().await.unwrap();
        assert_eq!(connection.calls()[0].kind, "aggregate");
    }

    #[tokio::test]
    async fn test_collect_without_connection() {
        let (collector, mut rx) = test_collector(test_spec(), None);

        let err = collector.collect().await.unwrap_err();
        assert!(err.to_string().contains("no MongoDB connection available"));
        assert_eq!(published_count(&collector), 0);

        let failure = rx.try_recv().unwrap();
        assert_eq!(failure.collector, "orders_total");
        assert!(rx.try_recv().is_err(), "exactly one failure is reported");
    }

    #[tokio::test]
    async fn test_collect_query_submission_failure() {
        let connection = Arc::new(
            FakeConnection::new().with_query_error(QueryError::Driver("socket reset".to_string())),
        );
        let (collector, mut rx) = test_collector(test_spec(), Some(connection));

        let err = collector.collect().await.unwrap_err();
        assert!(err.to_string().contains("socket reset"));
        assert_eq!(published_count(&collector), 0);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_collect_missing_value_attribute() {
        let connection =
            Arc::new(FakeConnection::new().with_docs(vec![doc! { "region_code": "eu" }]));
        let (collector, mut rx) = test_collector(test_spec(), Some(connection));

        let err = collector.collect().await.unwrap_err();
        assert!(err.to_string().contains("metric attribute 'count' not found"));
        assert_eq!(published_count(&collector), 0);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "exactly one failure is reported");
    }

    #[tokio::test]
    async fn test_collect_unsupported_value_type_names_field_and_type() {
        let connection = Arc::new(
            FakeConnection::new().with_docs(vec![doc! { "count": "five", "region_code": "eu" }]),
        );
        let (collector, _rx) = test_collector(test_spec(), Some(connection));

        let err = collector.collect().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unsupported metric value type"));
        assert!(message.contains("'count'"));
        assert!(message.contains("string"));
        assert_eq!(published_count(&collector), 0);
    }

    #[tokio::test]
    async fn test_collect_decode_failure_voids_batch() {
        let connection = Arc::new(FakeConnection::new().with_cursor(vec![
            FakeStep::Doc(doc! { "count": 1_i32, "region_code": "eu" }),
            FakeStep::DecodeError("corrupt document".to_string()),
        ]));
        let (collector, _rx) = test_collector(test_spec(), Some(connection));

        let err = collector.collect().await.unwrap_err();
        assert!(err.to_string().contains("corrupt document"));
        assert_eq!(published_count(&collector), 0);
    }

    #[tokio::test]
    async fn test_collect_trailing_iteration_error_keeps_partial() {
        let connection = Arc::new(FakeConnection::new().with_cursor(vec![
            FakeStep::Doc(doc! { "count": 1_i32, "region_code": "eu" }),
            FakeStep::AdvanceError("cursor lost".to_string()),
        ]));
        let (collector, mut rx) = test_collector(test_spec(), Some(connection));

        let err = collector.collect().await.unwrap_err();
        assert!(err.to_string().contains("cursor lost"));
        assert_eq!(published_count(&collector), 1);
        assert_eq!(collector.gauge.with_label_values(&["eu"]).get(), 1.0);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failed_attempt_clears_previous_samples() {
        let connection = Arc::new(
            FakeConnection::new()
                .with_docs(vec![doc! { "count": 5_i64, "region_code": "eu" }])
                .with_query_error(QueryError::Driver("gone".to_string())),
        );
        let (collector, _rx) = test_collector(test_spec(), Some(connection));

        assert_eq!(collector.collect().await.unwrap(), 1);
        assert_eq!(published_count(&collector), 1);

        assert!(collector.collect().await.is_err());
        assert_eq!(published_count(&collector), 0);
    }

    #[tokio::test]
    async fn test_collect_without_query_body() {
        let mut spec = test_spec();
        spec.find = None;
        let connection = Arc::new(FakeConnection::new());
        let (collector, mut rx) = test_collector(spec, Some(connection));

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, CollectorError::MissingQuery(_)));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dynamic_labels_follow_sorted_name_order() {
        let mut spec = test_spec();
        spec.tag_attributes = BTreeMap::from([
            ("zone".to_string(), "zone_field".to_string()),
            ("area".to_string(), "area_field".to_string()),
        ]);

        let connection = Arc::new(FakeConnection::new().with_docs(vec![
            doc! { "count": 7_i32, "zone_field": "z1", "area_field": "a1" },
        ]));
        let (collector, _rx) = test_collector(spec, Some(connection));

        assert_eq!(collector.collect().await.unwrap(), 1);
        // Sorted exported-name order: area before zone.
        assert_eq!(collector.gauge.with_label_values(&["a1", "z1"]).get(), 7.0);
    }

    #[tokio::test]
    async fn test_update_connection_concurrent_with_collect() {
        let connection: Arc<dyn Connection> = Arc::new(FakeConnection::new());
        let (collector, _rx) = test_collector(test_spec(), Some(connection));
        let collector = Arc::new(collector);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let collector = Arc::clone(&collector);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    // Exhausted scripts yield empty cursors, so every
                    // attempt succeeds with zero samples.
                    collector.collect().await.unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let collector = Arc::clone(&collector);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let replacement: Arc<dyn Connection> = Arc::new(FakeConnection::new());
                    collector.update_connection(replacement).await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(collector.collect().await.is_ok());
    }

    #[tokio::test]
    async fn test_register_with_registry() {
        let (collector, _rx) = test_collector(test_spec(), None);
        let registry = Registry::new();
        collector.register(&registry).unwrap();

        // Re-registering the same family is rejected by the registry.
        assert!(collector.register(&registry).is_err());
    }

    #[tokio::test]
    async fn test_empty_help_falls_back_to_name() {
        let mut spec = test_spec();
        spec.help = String::new();
        let (collector, _rx) = test_collector(spec, None);
        assert_eq!(collector.gauge.collect()[0].get_help(), "orders_total");
    }
}
