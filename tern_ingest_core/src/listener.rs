//! Batch lifecycle hooks.
use tracing::{debug, info, warn};

use crate::{batch::BatchId, error::IngestError, outcome::BatchOutcome};

/// Observes batches as they move through the ingestor.
///
/// `concurrency` is the number of batches in flight, including the one the
/// hook is about if it was admitted. `on_admitted` runs on the producer path
/// while the batch holds its slot. The completion hooks run on the batch task
/// right after the slot is released. Hooks must not block.
pub trait IngestListener: Send + Sync {
    /// A batch was admitted and is about to be sent to the sink.
    fn on_admitted(&self, _concurrency: usize, _batch_id: BatchId, _items: usize, _bytes: u64) {}

    /// The sink executed a batch. The outcome may contain item failures.
    fn on_completed(&self, _concurrency: usize, _outcome: &BatchOutcome) {}

    /// A batch was lost as a whole.
    ///
    /// Either the sink could not execute it and the ingestor closed, or it
    /// was dropped before admission because the ingestor was closed or shut
    /// down. See [`IngestError::is_fatal`] and [`IngestError::is_rejected`].
    fn on_fatal(&self, _concurrency: usize, _batch_id: BatchId, _error: &IngestError) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl IngestListener for NoopListener {}

/// Logs a line per batch event with `tracing`.
///
/// Item failures and fatal errors are already logged by the dispatcher, so
/// this only reports counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl IngestListener for LoggingListener {
    fn on_admitted(&self, concurrency: usize, batch_id: BatchId, items: usize, bytes: u64) {
        debug!(batch_id = %batch_id, items, bytes, concurrency, "sending batch");
    }

    fn on_completed(&self, concurrency: usize, outcome: &BatchOutcome) {
        if outcome.is_all_ok() {
            debug!(
                batch_id = %outcome.batch_id,
                succeeded = outcome.succeeded,
                took_ms = outcome.took.as_millis() as u64,
                concurrency,
                "batch completed"
            );
        } else {
            info!(
                batch_id = %outcome.batch_id,
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                took_ms = outcome.took.as_millis() as u64,
                concurrency,
                "batch completed with failures"
            );
        }
    }

    fn on_fatal(&self, concurrency: usize, batch_id: BatchId, error: &IngestError) {
        if error.is_fatal() {
            warn!(batch_id = %batch_id, concurrency, "ingestor closed, call reopen to resume");
        } else if error.is_rejected() {
            info!(batch_id = %batch_id, concurrency, error = %error, "batch dropped before admission");
        }
    }
}
