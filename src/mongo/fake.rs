//! Scriptable fakes for the connection capability traits.
//!
//! Tests script a sequence of cursor outcomes per connection and a sequence
//! of connect outcomes per connector, then assert on the recorded calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bson::Document;

use super::{Connection, Connector, Cursor, QueryError};

/// One scripted cursor step.
#[derive(Debug, Clone)]
pub enum FakeStep {
    /// Advance succeeds and the document decodes cleanly.
    Doc(Document),
    /// Advance succeeds but decoding the current document fails.
    DecodeError(String),
    /// Advance itself fails (iteration error).
    AdvanceError(String),
}

pub struct FakeCursor {
    steps: VecDeque<FakeStep>,
    current: Option<Result<Document, QueryError>>,
}

impl FakeCursor {
    pub fn new(steps: Vec<FakeStep>) -> Self {
        Self {
            steps: steps.into(),
            current: None,
        }
    }
}

#[async_trait::async_trait]
impl Cursor for FakeCursor {
    async fn advance(&mut self) -> Result<bool, QueryError> {
        match self.steps.pop_front() {
            None => Ok(false),
            Some(FakeStep::Doc(doc)) => {
                self.current = Some(Ok(doc));
                Ok(true)
            }
            Some(FakeStep::DecodeError(msg)) => {
                self.current = Some(Err(QueryError::Decode(msg)));
                Ok(true)
            }
            Some(FakeStep::AdvanceError(msg)) => Err(QueryError::Driver(msg)),
        }
    }

    fn decode_current(&self) -> Result<Document, QueryError> {
        match &self.current {
            Some(result) => result.clone(),
            None => Err(QueryError::Decode("cursor not advanced".to_string())),
        }
    }
}

/// A recorded query submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub kind: &'static str,
    pub db: String,
    pub collection: String,
    pub body: String,
}

/// Connection whose query results are scripted up front.
///
/// Each query pops the next scripted outcome; an empty script yields an
/// empty cursor.
#[derive(Default)]
pub struct FakeConnection {
    outcomes: Mutex<VecDeque<Result<Vec<FakeStep>, QueryError>>>,
    calls: Mutex<Vec<RecordedQuery>>,
    ping_error: Mutex<Option<QueryError>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful cursor yielding the given documents.
    pub fn with_docs(self, docs: Vec<Document>) -> Self {
        self.with_cursor(docs.into_iter().map(FakeStep::Doc).collect())
    }

    /// Script a successful cursor with explicit steps.
    pub fn with_cursor(self, steps: Vec<FakeStep>) -> Self {
        self.outcomes.lock().unwrap().push_back(Ok(steps));
        self
    }

    /// Script a query submission failure.
    pub fn with_query_error(self, error: QueryError) -> Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    /// Make subsequent pings fail.
    pub fn with_ping_error(self, error: QueryError) -> Self {
        *self.ping_error.lock().unwrap() = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.lock().unwrap().clone()
    }

    fn run(
        &self,
        kind: &'static str,
        db: &str,
        collection: &str,
        body: &str,
    ) -> Result<Box<dyn Cursor>, QueryError> {
        self.calls.lock().unwrap().push(RecordedQuery {
            kind,
            db: db.to_string(),
            collection: collection.to_string(),
            body: body.to_string(),
        });
        match self.outcomes.lock().unwrap().pop_front() {
            None => Ok(Box::new(FakeCursor::new(Vec::new()))),
            Some(Ok(steps)) => Ok(Box::new(FakeCursor::new(steps))),
            Some(Err(error)) => Err(error),
        }
    }
}

#[async_trait::async_trait]
impl Connection for FakeConnection {
    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &str,
    ) -> Result<Box<dyn Cursor>, QueryError> {
        self.run("find", db, collection, filter)
    }

    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: &str,
    ) -> Result<Box<dyn Cursor>, QueryError> {
        self.run("aggregate", db, collection, pipeline)
    }

    async fn ping(&self) -> Result<(), QueryError> {
        match &*self.ping_error.lock().unwrap() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Connector whose connect outcomes are scripted up front.
///
/// An exhausted script keeps failing, which leaves a manager under test in
/// its retry loop instead of handing out unplanned connections.
pub struct FakeConnector {
    outcomes: Mutex<VecDeque<Result<Arc<dyn Connection>, QueryError>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(outcomes: Vec<Result<Arc<dyn Connection>, QueryError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, QueryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Err(QueryError::Driver("no scripted connection".to_string())),
        }
    }
}
