//! Engine-wide counters, gauges and the closed flag.
use std::{
    collections::BTreeSet,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::watch;

use crate::{
    error::{ClosedSnafu, IngestError, Result, ShutDownSnafu},
    outcome::BatchOutcome,
};

/// Shared state of an ingestor.
///
/// Counters only grow. The outstanding gauges rise on admission and fall on
/// completion. `closed` goes from false to true once, on the first
/// batch-fatal error, and is cleared only by [`EngineState::reopen`].
#[derive(Debug)]
pub struct EngineState {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
    total_bytes: AtomicU64,
    outstanding_docs: AtomicU64,
    outstanding_bytes: AtomicU64,
    shut_down: AtomicBool,
    closed: watch::Sender<bool>,
    last_error: Mutex<Option<IngestError>>,
    bulk_collections: Mutex<BTreeSet<String>>,
}

/// A point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Operations admitted to the sink.
    pub submitted: u64,
    /// Operations the sink applied.
    pub succeeded: u64,
    /// Operations the sink rejected, lost to a batch-fatal error, or dropped
    /// without reaching the sink.
    pub failed: u64,
    /// Sum of the sink execution times.
    pub total_latency: Duration,
    /// Bytes admitted to the sink.
    pub total_bytes: u64,
    /// Operations in batches not yet completed.
    pub outstanding_docs: u64,
    /// Bytes in batches not yet completed.
    pub outstanding_bytes: u64,
    /// Whether a batch-fatal error closed the engine.
    pub closed: bool,
}

impl EngineState {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            outstanding_docs: AtomicU64::new(0),
            outstanding_bytes: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            closed,
            last_error: Mutex::new(None),
            bulk_collections: Mutex::new(BTreeSet::new()),
        }
    }

    /// Fails if the engine is closed.
    pub fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return ClosedSnafu {}.fail();
        }
        Ok(())
    }

    /// Fails if the engine is shut down or closed.
    pub fn check_accepting(&self) -> Result<()> {
        if self.is_shut_down() {
            return ShutDownSnafu {}.fail();
        }
        self.check_open()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the engine is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Marks the engine as shut down. Returns false if it already was.
    pub fn begin_shutdown(&self) -> bool {
        !self.shut_down.swap(true, Ordering::AcqRel)
    }

    pub fn last_error(&self) -> Option<IngestError> {
        lock(&self.last_error).clone()
    }

    /// Records the admission of a batch.
    pub fn record_admitted(&self, docs: usize, bytes: u64) {
        self.submitted.fetch_add(docs as u64, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.outstanding_docs
            .fetch_add(docs as u64, Ordering::Relaxed);
        self.outstanding_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a batch the sink executed.
    pub fn record_completed(&self, docs: usize, bytes: u64, outcome: &BatchOutcome) {
        self.succeeded
            .fetch_add(outcome.succeeded as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(outcome.failed as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(outcome.took.as_millis() as u64, Ordering::Relaxed);
        self.release_outstanding(docs, bytes);
    }

    /// Records a batch-fatal error and closes the engine.
    ///
    /// Only the error that closes the engine is kept as the last error.
    /// Returns true if this call closed the engine.
    pub fn record_fatal(&self, docs: usize, bytes: u64, error: IngestError) -> bool {
        self.failed.fetch_add(docs as u64, Ordering::Relaxed);
        self.release_outstanding(docs, bytes);

        let mut last_error = lock(&self.last_error);
        let transitioned = self.closed.send_if_modified(|closed| {
            if *closed {
                return false;
            }
            *closed = true;
            true
        });

        if transitioned {
            *last_error = Some(error);
        }

        transitioned
    }

    /// Records operations that were accepted but never reached the sink.
    ///
    /// The closed flag and the last error are left unchanged.
    pub fn record_dropped(&self, docs: usize) {
        self.failed.fetch_add(docs as u64, Ordering::Relaxed);
    }

    /// Clears the closed flag and the last error. Counters are kept.
    pub fn reopen(&self) {
        let mut last_error = lock(&self.last_error);
        *last_error = None;
        self.closed.send_replace(false);
    }

    /// Registers a collection in bulk mode. Returns false if it already was.
    pub fn start_bulk(&self, collection: &str) -> bool {
        lock(&self.bulk_collections).insert(collection.to_string())
    }

    /// Removes a collection from bulk mode. Returns false if it was not in bulk mode.
    pub fn stop_bulk(&self, collection: &str) -> bool {
        lock(&self.bulk_collections).remove(collection)
    }

    pub fn is_bulk(&self, collection: &str) -> bool {
        lock(&self.bulk_collections).contains(collection)
    }

    /// Collections currently in bulk mode.
    pub fn bulk_collections(&self) -> Vec<String> {
        lock(&self.bulk_collections).iter().cloned().collect()
    }

    pub fn counters(&self) -> EngineCounters {
        EngineCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_latency: Duration::from_millis(self.total_latency_ms.load(Ordering::Relaxed)),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            outstanding_docs: self.outstanding_docs.load(Ordering::Relaxed),
            outstanding_bytes: self.outstanding_bytes.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn release_outstanding(&self, docs: usize, bytes: u64) {
        self.outstanding_docs
            .fetch_sub(docs as u64, Ordering::Relaxed);
        self.outstanding_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
