//! Query collectors.
//!
//! One [`QueryCollector`] per configured metric. On every scrape it executes
//! its query against the currently bound connection and republishes the
//! result documents as gauge samples. Failures are logged and reported to
//! the connection manager's error sink; they never fail the scrape.
//!
//! - [`QueryCollector`]: per-metric query execution and sample publication
//! - [`CollectorError`]: failure taxonomy for a single collection attempt

mod extract;
mod query;

use std::time::Duration;

use thiserror::Error;

use crate::mongo::QueryError;

pub use query::QueryCollector;

/// Bound on one whole collection attempt (query submission + iteration),
/// independent of the driver's own timeouts.
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a single collection attempt.
#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    /// No connection is bound yet (manager still connecting or reconnecting).
    #[error("no MongoDB connection available")]
    NoConnection,

    /// Neither query form is configured. Load-time validation prevents this;
    /// checked defensively at dispatch.
    #[error("nothing to do, check config of metric '{0}'")]
    MissingQuery(String),

    /// Query submission, iteration or document decoding failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The configured value field is absent from a result document.
    #[error("metric attribute '{attribute}' not found in result document")]
    AttributeNotFound { attribute: String },

    /// The configured value field holds a non-numeric type.
    #[error("unsupported metric value type for attribute '{attribute}': {type_name}")]
    UnsupportedValueType {
        attribute: String,
        type_name: String,
    },

    /// A dynamic label field is absent from a result document.
    #[error("tag attribute '{attribute}' not found in result document")]
    TagAttributeNotFound { attribute: String },

    /// A dynamic label field holds a type with no defined stringification.
    #[error("unsupported tag value type for attribute '{attribute}': {type_name}")]
    UnsupportedTagType {
        attribute: String,
        type_name: String,
    },

    /// The attempt exceeded [`COLLECT_TIMEOUT`].
    #[error("collection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The metric could not be built or registered for exposition.
    #[error("failed to register collector: {0}")]
    Registration(String),
}

impl CollectorError {
    /// Short stable tag for error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoConnection => "no_connection",
            Self::MissingQuery(_) => "missing_query",
            Self::Query(QueryError::InvalidQuery(_)) => "invalid_query",
            Self::Query(QueryError::Driver(_)) => "driver",
            Self::Query(QueryError::Decode(_)) => "decode",
            Self::AttributeNotFound { .. } => "attribute_not_found",
            Self::UnsupportedValueType { .. } => "unsupported_value_type",
            Self::TagAttributeNotFound { .. } => "tag_attribute_not_found",
            Self::UnsupportedTagType { .. } => "unsupported_tag_type",
            Self::Timeout(_) => "timeout",
            Self::Registration(_) => "registration",
        }
    }
}
