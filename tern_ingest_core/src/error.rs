use std::sync::Arc;

use snafu::Snafu;

use crate::{batch::BatchId, sink::SinkError};

/// Ingestor error types.
///
/// Validation, closed and shut down errors are returned synchronously to the
/// producer. Batch-fatal errors are delivered through the listener and kept
/// as the ingestor's last error.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Validation error.
    ///
    /// This errors are used when an operation or an option is malformed.
    #[snafu(display("validation error: {message}"))]
    Validation { message: String },
    /// The ingestor was closed by a batch-fatal error.
    ///
    /// Admissions are refused until the ingestor is explicitly reopened.
    #[snafu(display("ingestor is closed"))]
    Closed,
    /// The ingestor is shutting down or has been shut down.
    #[snafu(display("ingestor is shut down"))]
    ShutDown,
    /// The sink could not execute a batch as a whole.
    #[snafu(display("batch {batch_id} failed: {source}"))]
    Sink {
        batch_id: BatchId,
        #[snafu(source(from(SinkError, Arc::new)))]
        source: Arc<SinkError>,
    },
    /// The sink refused to change the bulk mode of a collection.
    #[snafu(display("failed to set bulk mode for collection {collection}: {source}"))]
    BulkMode {
        collection: String,
        #[snafu(source(from(SinkError, Arc::new)))]
        source: Arc<SinkError>,
    },
    /// Internal error.
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

impl IngestError {
    /// Returns true if the error means the ingestor refuses new operations.
    pub fn is_rejected(&self) -> bool {
        matches!(self, IngestError::Closed | IngestError::ShutDown)
    }

    /// Returns true if the error closed the ingestor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Sink { .. } | IngestError::Internal { .. })
    }
}
