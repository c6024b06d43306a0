//! Metric definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::validation::{is_valid_label_name, is_valid_metric_name, ConfigError};

/// One configured metric: a query against a collection plus the rules for
/// turning each result document into a gauge sample.
///
/// Exactly one of `find` / `aggregate` must be set. Specs are created at
/// load time and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Exported metric name. Must match `^[a-zA-Z_:][a-zA-Z0-9_:]*$`.
    pub name: String,
    /// Help text for the exported metric.
    #[serde(default)]
    pub help: String,
    /// Database to query.
    pub db: String,
    /// Collection to query.
    pub collection: String,
    /// Static labels attached to every sample (label name -> constant value).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Find filter as extended-JSON text (mutually exclusive with `aggregate`).
    #[serde(default)]
    pub find: Option<String>,
    /// Aggregation pipeline as extended-JSON text (mutually exclusive with `find`).
    #[serde(default)]
    pub aggregate: Option<String>,
    /// Document field holding the sample value.
    pub metrics_attribute: String,
    /// Dynamic labels (exported label name -> source document field).
    ///
    /// Label order is the sorted exported-name order, used consistently for
    /// registration and sample emission.
    #[serde(default)]
    pub tag_attributes: BTreeMap<String, String>,
}

/// The query body of a spec, typed by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryBody<'a> {
    Find(&'a str),
    Aggregate(&'a str),
}

impl MetricSpec {
    /// The configured query body, if any.
    ///
    /// Validation guarantees exactly one is set; callers still handle `None`
    /// defensively.
    pub fn query_body(&self) -> Option<QueryBody<'_>> {
        if let Some(pipeline) = non_empty(&self.aggregate) {
            return Some(QueryBody::Aggregate(pipeline));
        }
        non_empty(&self.find).map(QueryBody::Find)
    }

    /// Validate the spec. `index` identifies the entry in error messages.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Validation(format!("metric[{index}]: {msg}")));

        if self.name.trim().is_empty() {
            return fail("name cannot be empty".to_string());
        }
        if !is_valid_metric_name(&self.name) {
            return fail(format!("invalid metric name '{}'", self.name));
        }
        if self.db.trim().is_empty() {
            return fail("database name cannot be empty".to_string());
        }
        if self.collection.trim().is_empty() {
            return fail("collection name cannot be empty".to_string());
        }

        let has_find = non_empty(&self.find).is_some();
        let has_aggregate = non_empty(&self.aggregate).is_some();
        if !has_find && !has_aggregate {
            return fail("either 'find' or 'aggregate' query must be specified".to_string());
        }
        if has_find && has_aggregate {
            return fail("cannot specify both 'find' and 'aggregate' queries".to_string());
        }

        if self.metrics_attribute.trim().is_empty() {
            return fail("metricsAttribute cannot be empty".to_string());
        }

        for label in self.tags.keys().chain(self.tag_attributes.keys()) {
            if !is_valid_label_name(label) {
                return fail(format!("invalid label name '{label}'"));
            }
        }

        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}
