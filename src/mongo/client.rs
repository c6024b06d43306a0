//! Driver-backed implementations of the [`Connection`] capability traits.

use std::sync::Arc;
use std::time::Duration;

use bson::{doc, Bson, Document};
use mongodb::options::{AggregateOptions, ClientOptions};
use mongodb::Client;

use super::{bson_type_name, Connection, Connector, Cursor, QueryError};

/// Bound on establishing a connection and selecting a server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side time bound for aggregation pipelines.
const AGGREGATE_MAX_TIME: Duration = Duration::from_secs(2);

/// Opens [`MongoConnection`]s for a fixed URI.
pub struct MongoConnector {
    uri: String,
}

impl MongoConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait::async_trait]
impl Connector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, QueryError> {
        let connection = MongoConnection::connect(&self.uri).await?;
        Ok(Arc::new(connection))
    }
}

/// A live session against a MongoDB deployment.
pub struct MongoConnection {
    client: Client,
}

impl MongoConnection {
    /// Open a connection and verify the server is reachable.
    ///
    /// The driver connects lazily, so a ping is issued here; without it the
    /// reconnect loop could not observe an unreachable server until the
    /// first query.
    pub async fn connect(uri: &str) -> Result<Self, QueryError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(CONNECT_TIMEOUT);

        let client = Client::with_options(options)?;
        let connection = Self { client };
        connection.ping().await?;
        Ok(connection)
    }
}

#[async_trait::async_trait]
impl Connection for MongoConnection {
    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &str,
    ) -> Result<Box<dyn Cursor>, QueryError> {
        let filter = parse_filter(filter)?;
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(collection)
            .find(filter, None)
            .await?;
        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: &str,
    ) -> Result<Box<dyn Cursor>, QueryError> {
        let pipeline = parse_pipeline(pipeline)?;
        let options = AggregateOptions::builder()
            .max_time(AGGREGATE_MAX_TIME)
            .build();
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(collection)
            .aggregate(pipeline, options)
            .await?;
        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    async fn ping(&self) -> Result<(), QueryError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }
}

struct MongoCursor {
    inner: mongodb::Cursor<Document>,
}

#[async_trait::async_trait]
impl Cursor for MongoCursor {
    async fn advance(&mut self) -> Result<bool, QueryError> {
        self.inner.advance().await.map_err(Into::into)
    }

    fn decode_current(&self) -> Result<Document, QueryError> {
        self.inner
            .deserialize_current()
            .map_err(|e| QueryError::Decode(e.to_string()))
    }
}

/// Parse an extended-JSON find filter into a document.
fn parse_filter(text: &str) -> Result<Document, QueryError> {
    match parse_ext_json(text)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(QueryError::InvalidQuery(format!(
            "find filter must be a document, got {}",
            bson_type_name(&other)
        ))),
    }
}

/// Parse an extended-JSON aggregation pipeline into its stage documents.
fn parse_pipeline(text: &str) -> Result<Vec<Document>, QueryError> {
    let stages = match parse_ext_json(text)? {
        Bson::Array(stages) => stages,
        other => {
            return Err(QueryError::InvalidQuery(format!(
                "aggregation pipeline must be an array, got {}",
                bson_type_name(&other)
            )))
        }
    };
    stages
        .into_iter()
        .map(|stage| match stage {
            Bson::Document(doc) => Ok(doc),
            other => Err(QueryError::InvalidQuery(format!(
                "pipeline stage must be a document, got {}",
                bson_type_name(&other)
            ))),
        })
        .collect()
}

fn parse_ext_json(text: &str) -> Result<Bson, QueryError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;
    Bson::try_from(value).map_err(|e| QueryError::InvalidQuery(e.to_string()))
}
