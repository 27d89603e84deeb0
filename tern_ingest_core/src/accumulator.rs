//! Pending operations waiting to be cut into batches.
//!
//! The accumulator keeps the queue and its byte estimate under the same lock,
//! so every take removes exactly the operations it subtracts from the byte
//! counter. The lock-free `len` and `estimated_bytes` readers may observe a
//! take or an add that is still in progress, but never a state that a
//! completed take left behind inconsistently.
use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{
    error::{Result, ShutDownSnafu},
    operation::PendingOperation,
};

/// A multi-producer queue of pending operations with a running size estimate.
#[derive(Debug, Default)]
pub struct Accumulator {
    queue: Mutex<VecDeque<PendingOperation>>,
    len: AtomicUsize,
    bytes: AtomicU64,
    sealed: AtomicBool,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_parts(operations: VecDeque<PendingOperation>, bytes: u64) -> Self {
        let len = operations.len();
        Self {
            queue: Mutex::new(operations),
            len: AtomicUsize::new(len),
            bytes: AtomicU64::new(bytes),
            sealed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingOperation>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues an operation.
    ///
    /// Fails if the operation is malformed or the accumulator is sealed.
    pub fn add(&self, operation: PendingOperation) -> Result<()> {
        operation.validate()?;

        let size = operation.estimated_size();
        let mut queue = self.lock();
        if self.sealed.load(Ordering::Acquire) {
            return ShutDownSnafu {}.fail();
        }
        queue.push_back(operation);
        self.len.store(queue.len(), Ordering::Release);
        self.bytes.fetch_add(size, Ordering::AcqRel);

        Ok(())
    }

    /// Refuses every later [`Accumulator::add`]. Queued operations can still
    /// be taken.
    ///
    /// An add that completed before this call is visible to the next take.
    pub fn seal(&self) {
        let _queue = self.lock();
        self.sealed.store(true, Ordering::Release);
    }

    /// Drains every queued operation into a new accumulator.
    ///
    /// Operations added concurrently may or may not be included.
    pub fn take_all(&self) -> Accumulator {
        let mut queue = self.lock();
        let operations = std::mem::take(&mut *queue);
        let bytes = operations.iter().map(PendingOperation::estimated_size).sum();
        self.len.store(0, Ordering::Release);
        self.bytes.fetch_sub(bytes, Ordering::AcqRel);

        Accumulator::from_parts(operations, bytes)
    }

    /// Drains at most `n` operations, in insertion order, into a new accumulator.
    pub fn take(&self, n: usize) -> Accumulator {
        self.take_bounded(n, u64::MAX)
    }

    /// Drains operations until either `max_operations` are taken or the taken
    /// operations account for at least `max_bytes`.
    ///
    /// The operation that crosses `max_bytes` is included, so the result can
    /// exceed the byte bound by at most one operation.
    pub fn take_bounded(&self, max_operations: usize, max_bytes: u64) -> Accumulator {
        let mut queue = self.lock();
        let mut operations = VecDeque::with_capacity(max_operations.min(queue.len()));
        let mut bytes = 0;

        while operations.len() < max_operations && bytes < max_bytes {
            let Some(operation) = queue.pop_front() else {
                break;
            };
            bytes += operation.estimated_size();
            operations.push_back(operation);
        }

        self.len.store(queue.len(), Ordering::Release);
        self.bytes.fetch_sub(bytes, Ordering::AcqRel);

        Accumulator::from_parts(operations, bytes)
    }

    /// Returns the number of queued operations and their estimated size,
    /// observed atomically.
    pub fn levels(&self) -> (usize, u64) {
        let queue = self.lock();
        (queue.len(), self.bytes.load(Ordering::Acquire))
    }

    /// Approximate number of queued operations.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated size in bytes of the queued operations.
    pub fn estimated_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Consumes the accumulator, returning its operations in insertion order.
    pub fn into_operations(self) -> Vec<PendingOperation> {
        self.queue
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::operation::OPERATION_OVERHEAD_BYTES;

    fn index(id: usize, payload_len: usize) -> PendingOperation {
        PendingOperation::index("test", Some(id.to_string()), vec![b'x'; payload_len])
    }

    #[test]
    fn test_add_accounts_payload_and_overhead() {
        let acc = Accumulator::new();
        acc.add(index(0, 100)).unwrap();
        acc.add(PendingOperation::delete("test", "1")).unwrap();

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.estimated_bytes(), 100 + 2 * OPERATION_OVERHEAD_BYTES);
        assert_eq!(acc.levels(), (2, 100 + 2 * OPERATION_OVERHEAD_BYTES));
    }

    #[test]
    fn test_add_rejects_invalid_operation() {
        let acc = Accumulator::new();
        assert!(acc.add(PendingOperation::delete("", "1")).is_err());
        assert!(acc.is_empty());
        assert_eq!(acc.estimated_bytes(), 0);
    }

    #[test]
    fn test_sealed_rejects_adds_but_keeps_queue() {
        let acc = Accumulator::new();
        acc.add(index(0, 10)).unwrap();
        acc.seal();

        let result = acc.add(index(1, 10));
        assert!(matches!(result, Err(crate::error::IngestError::ShutDown)));
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.estimated_bytes(), 10 + OPERATION_OVERHEAD_BYTES);

        assert_eq!(acc.take_all().len(), 1);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_take_all_drains_everything() {
        let acc = Accumulator::new();
        for i in 0..10 {
            acc.add(index(i, i)).unwrap();
        }
        let expected_bytes: u64 = (0..10).map(|i| i as u64 + OPERATION_OVERHEAD_BYTES).sum();

        let taken = acc.take_all();
        assert_eq!(taken.len(), 10);
        assert_eq!(taken.estimated_bytes(), expected_bytes);
        assert!(acc.is_empty());
        assert_eq!(acc.estimated_bytes(), 0);

        let ids = taken
            .into_operations()
            .iter()
            .map(|op| op.id().unwrap().to_string())
            .collect::<Vec<_>>();
        let expected = (0..10).map(|i| i.to_string()).collect::<Vec<_>>();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_take_is_bounded_by_count() {
        let acc = Accumulator::new();
        for i in 0..5 {
            acc.add(index(i, 10)).unwrap();
        }

        let taken = acc.take(3);
        assert_eq!(taken.len(), 3);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.estimated_bytes(), 2 * (10 + OPERATION_OVERHEAD_BYTES));

        let rest = acc.take(10);
        assert_eq!(rest.len(), 2);
        assert!(acc.is_empty());
        assert_eq!(acc.estimated_bytes(), 0);
    }

    #[test]
    fn test_take_bounded_by_bytes_includes_crossing_operation() {
        let acc = Accumulator::new();
        for i in 0..10 {
            acc.add(index(i, 50)).unwrap();
        }

        // Each operation accounts for 100 bytes.
        let taken = acc.take_bounded(100, 250);
        assert_eq!(taken.len(), 3);
        assert_eq!(taken.estimated_bytes(), 300);
        assert_eq!(acc.len(), 7);
    }

    #[test]
    fn test_take_from_empty() {
        let acc = Accumulator::new();
        let taken = acc.take(10);
        assert!(taken.is_empty());
        assert_eq!(taken.estimated_bytes(), 0);
    }

    #[test]
    fn test_concurrent_add_and_take_keep_bytes_consistent() {
        let acc = Arc::new(Accumulator::new());
        let producers = (0..4)
            .map(|p| {
                let acc = acc.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        acc.add(index(p * 1000 + i, i % 17)).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut drained = Vec::new();
        while producers.iter().any(|p| !p.is_finished()) {
            drained.push(acc.take(64));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained.push(acc.take_all());

        assert_eq!(acc.estimated_bytes(), 0);
        assert!(acc.is_empty());

        let mut total_ops = 0;
        for taken in drained {
            let bytes = taken.estimated_bytes();
            let ops = taken.into_operations();
            let expected: u64 = ops.iter().map(PendingOperation::estimated_size).sum();
            assert_eq!(bytes, expected);
            total_ops += ops.len();
        }
        assert_eq!(total_ops, 4000);
    }
}
