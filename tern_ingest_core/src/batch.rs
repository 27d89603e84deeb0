use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use crate::{accumulator::Accumulator, operation::PendingOperation};

/// Engine-unique batch identifier. Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(u64);

/// A group of operations submitted together to the sink.
#[derive(Debug)]
pub struct Batch {
    /// The batch id.
    pub id: BatchId,
    /// The operations, in the order they were accumulated.
    pub operations: Vec<PendingOperation>,
    /// The estimated size of the operations.
    pub estimated_bytes: u64,
    /// When the batch was cut. Admission wait is measured from here.
    pub created_at: Instant,
}

/// Trait for generating batch ids.
pub trait BatchIdGenerator: Send + Sync + 'static {
    /// Returns the next id. Ids must increase monotonically.
    fn next_id(&self) -> BatchId;
}

/// Generates ids from an in-memory counter starting at 1.
#[derive(Debug)]
pub struct SequentialBatchIdGenerator {
    next: AtomicU64,
}

impl BatchId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Batch {
    /// Creates a batch from the operations drained into `operations`.
    pub fn new(id: BatchId, operations: Accumulator) -> Self {
        let estimated_bytes = operations.estimated_bytes();
        Self {
            id,
            operations: operations.into_operations(),
            estimated_bytes,
            created_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl SequentialBatchIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialBatchIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchIdGenerator for SequentialBatchIdGenerator {
    fn next_id(&self) -> BatchId {
        BatchId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let generator = SequentialBatchIdGenerator::new();
        assert_eq!(generator.next_id(), BatchId::new(1));
        assert_eq!(generator.next_id(), BatchId::new(2));
        assert_eq!(generator.next_id().to_string(), "3");
    }

    #[test]
    fn test_batch_from_accumulator() {
        let acc = Accumulator::new();
        acc.add(PendingOperation::index("test", Some("a".into()), "abc"))
            .unwrap();
        acc.add(PendingOperation::delete("test", "b")).unwrap();
        let expected_bytes = acc.estimated_bytes();

        let batch = Batch::new(BatchId::new(7), acc.take_all());
        assert_eq!(batch.id.as_u64(), 7);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.estimated_bytes, expected_bytes);
        assert_eq!(batch.operations[0].id(), Some("a"));
        assert_eq!(batch.operations[1].id(), Some("b"));
    }
}
