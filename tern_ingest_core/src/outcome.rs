//! Reconciliation of per-item results into a batch outcome.
use std::time::Duration;

use crate::{
    batch::{Batch, BatchId},
    sink::{BulkResponse, ItemOutcome, ShardId},
};

/// An operation rejected by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// The batch the operation belonged to.
    pub batch_id: BatchId,
    /// The shard the operation was routed to, if the sink reported one.
    pub shard: Option<ShardId>,
    /// The failure reason.
    pub message: String,
}

/// The outcome of a batch the sink executed.
///
/// Failures recorded here belong to this batch only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// The batch id.
    pub batch_id: BatchId,
    /// Number of operations applied.
    pub succeeded: usize,
    /// Number of operations rejected.
    pub failed: usize,
    /// One record per rejected operation.
    pub failures: Vec<FailureRecord>,
    /// Time the sink took to execute the batch.
    pub took: Duration,
}

impl BatchOutcome {
    /// Create an empty outcome for the given batch.
    pub fn empty(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            took: Duration::ZERO,
        }
    }

    /// Reconciles the sink response with the batch it answers.
    ///
    /// Operations the sink did not report on are recorded as failures.
    /// Extra items beyond the batch length are ignored.
    pub fn reconcile(batch: &Batch, response: BulkResponse) -> Self {
        let mut outcome = Self::empty(batch.id);
        outcome.took = response.took;

        let mut items = response.items.into_iter();
        for operation in batch.operations.iter() {
            match items.next() {
                Some(ItemOutcome::Success { .. }) => outcome.record_success(),
                Some(ItemOutcome::Failure { shard, message }) => {
                    outcome.record_failure(Some(shard), message)
                }
                None => outcome.record_failure(
                    None,
                    format!(
                        "no result reported for operation on collection {}",
                        operation.collection()
                    ),
                ),
            }
        }

        outcome
    }

    /// Record an applied operation.
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    /// Record a rejected operation.
    pub fn record_failure(&mut self, shard: Option<ShardId>, message: String) {
        self.failed += 1;
        self.failures.push(FailureRecord {
            batch_id: self.batch_id,
            shard,
            message,
        });
    }

    /// Returns true if every operation was applied.
    pub fn is_all_ok(&self) -> bool {
        self.failed == 0
    }

    /// Total number of operations in the outcome.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// A single message describing all failures.
    pub fn failure_message(&self) -> String {
        self.failures
            .iter()
            .map(|failure| match &failure.shard {
                Some(shard) => format!("{shard}: {}", failure.message),
                None => format!("[unassigned]: {}", failure.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
