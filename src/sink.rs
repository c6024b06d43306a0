//! Error reporting channel from collectors back to the connection manager.
//!
//! A query-time failure is a hint that the shared connection may be degraded,
//! not a guaranteed audit log: producers never block, and reports are dropped
//! when the channel is full. Losing a report under load is acceptable;
//! stalling a scrape is not.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::collector::CollectorError;

/// Capacity of the error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// A query failure reported by a collector.
#[derive(Debug, Clone)]
pub struct QueryFailure {
    /// Name of the metric whose collector reported the failure.
    pub collector: String,
    pub error: CollectorError,
}

/// Producer half of the error channel, cloned into every collector.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<QueryFailure>,
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

impl ErrorSink {
    /// Create the channel. The receiver belongs to the connection manager.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<QueryFailure>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Report a failure without blocking.
    pub fn report(&self, collector: &str, error: CollectorError) {
        let failure = QueryFailure {
            collector: collector.to_string(),
            error,
        };
        match self.tx.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(collector, "Error channel full, dropping failure report");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(collector, "Error channel closed, dropping failure report");
            }
        }
    }
}
