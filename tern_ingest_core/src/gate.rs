//! Bounded admission of in-flight batches.
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, ShutDownSnafu};

/// Allows at most `capacity` batches in flight at once.
///
/// The underlying semaphore is fair, so a waiting [`ConcurrencyGate::drain`]
/// also holds back admissions queued after it. Permits held by a drain are
/// not batches and are not counted by [`ConcurrencyGate::in_flight`].
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

/// A slot in the gate. The slot is released when the permit is dropped.
#[derive(Debug)]
pub struct GatePermit {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    fn new(permit: OwnedSemaphorePermit, in_flight: Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            in_flight,
            _permit: permit,
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        // Runs before the semaphore permit is returned.
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots held by batches.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits until a slot is available.
    ///
    /// Fails once the gate has been closed.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .or_else(|_| ShutDownSnafu {}.fail())?;

        Ok(GatePermit::new(permit, self.in_flight.clone()))
    }

    /// Acquires a slot only if one is immediately available.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit::new(permit, self.in_flight.clone()))
    }

    /// Waits until every acquired slot has been released, or the timeout expires.
    ///
    /// Returns true if the gate was fully drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(all)).await {
            // The permits are dropped right away, restoring the capacity.
            Ok(Ok(_permits)) => true,
            Ok(Err(_closed)) => self.in_flight() == 0,
            Err(_elapsed) => false,
        }
    }

    /// Closes the gate. Pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
