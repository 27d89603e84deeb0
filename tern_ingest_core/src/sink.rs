//! The backing store's bulk-execute capability.
use std::{fmt, time::Duration};

use async_trait::async_trait;
use snafu::Snafu;

use crate::{batch::BatchId, operation::PendingOperation};

/// Identifies the shard an operation was routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    /// The collection.
    pub collection: String,
    /// The shard number inside the collection.
    pub shard: u32,
}

/// The result of a single operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The operation was applied. `id` is the document id, assigned by the
    /// store if the operation did not carry one.
    Success { id: String },
    /// The operation was rejected.
    Failure { shard: ShardId, message: String },
}

/// Per-item results of a batch, in the same order as the operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkResponse {
    /// The item outcomes.
    pub items: Vec<ItemOutcome>,
    /// Time the store took to execute the batch.
    pub took: Duration,
}

/// Errors that prevent a batch from being executed as a whole.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The store cannot be reached.
    #[snafu(display("store unavailable: {message}"))]
    Unavailable { message: String },
    /// The store refused the request.
    #[snafu(display("request rejected: {message}"))]
    Rejected { message: String },
    /// The store failed while executing the request.
    #[snafu(display("storage error: {message}"))]
    Storage { message: String },
}

/// A store that executes batches of write operations.
///
/// Implementations must not retain the operations past the call.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Executes the operations of a batch.
    ///
    /// Individual operation failures are reported as [`ItemOutcome::Failure`].
    /// An error means the batch as a whole could not be executed.
    async fn execute(
        &self,
        batch_id: BatchId,
        operations: &[PendingOperation],
    ) -> Result<BulkResponse, SinkError>;

    /// Enables or disables bulk mode for a collection.
    ///
    /// Stores use this to trade visibility for throughput while loading data.
    async fn set_bulk_mode(&self, _collection: &str, _enabled: bool) -> Result<(), SinkError> {
        Ok(())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.collection, self.shard)
    }
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::Failure { .. })
    }
}

impl BulkResponse {
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_failure()).count()
    }
}
