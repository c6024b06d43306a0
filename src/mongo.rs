//! MongoDB access layer.
//!
//! Wraps the driver behind small capability traits so collectors and the
//! connection manager can be exercised against scriptable fakes:
//!
//! - [`Connection`]: run a find or aggregate query, returning a [`Cursor`]
//! - [`Cursor`]: streaming result handle, advanced one document at a time
//! - [`Connector`]: opens live connections (the reconnect loop's factory)
//!
//! Query bodies are extended-JSON text and are parsed once per collection
//! attempt. A cursor is owned by the attempt that created it and is closed
//! by the driver when dropped, on every exit path.

use std::sync::Arc;

use bson::{Bson, Document};
use thiserror::Error;

mod client;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{MongoConnection, MongoConnector};

/// Errors produced by query parsing, submission and iteration.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Query body is not valid extended JSON, or has the wrong shape
    /// (find takes a document, aggregate takes an array of stages).
    #[error("invalid query document: {0}")]
    InvalidQuery(String),

    /// Driver-level failure (connection, submission, iteration).
    #[error("mongodb error: {0}")]
    Driver(String),

    /// Current cursor document could not be decoded.
    #[error("failed to decode result document: {0}")]
    Decode(String),
}

impl From<mongodb::error::Error> for QueryError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Driver(err.to_string())
    }
}

/// Streaming handle over query results.
///
/// `advance` moves to the next document and reports end-of-stream as
/// `Ok(false)`; iteration errors surface as `Err`. The current document is
/// decoded separately so a decode failure is distinguishable from an
/// iteration failure.
#[async_trait::async_trait]
pub trait Cursor: Send {
    /// Advance to the next result document.
    async fn advance(&mut self) -> Result<bool, QueryError>;

    /// Decode the document the cursor is currently positioned on.
    fn decode_current(&self) -> Result<Document, QueryError>;
}

/// A live database session shared by all collectors.
///
/// Held as `Arc<dyn Connection>` and replaced wholesale on reconnect; the
/// superseded handle is dropped, which closes it.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Execute a find query. `filter` is an extended-JSON document.
    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &str,
    ) -> Result<Box<dyn Cursor>, QueryError>;

    /// Execute an aggregation pipeline. `pipeline` is an extended-JSON array
    /// of stage documents.
    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: &str,
    ) -> Result<Box<dyn Cursor>, QueryError>;

    /// Round-trip liveness check against the server.
    async fn ping(&self) -> Result<(), QueryError>;
}

/// Opens connections for the connection manager.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Connection>, QueryError>;
}

/// Human-readable name of a BSON value's runtime type, for error messages.
pub(crate) fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "boolean",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascript with scope",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal128",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "maxkey",
        Bson::MinKey => "minkey",
        Bson::DbPointer(_) => "dbpointer",
    }
}
