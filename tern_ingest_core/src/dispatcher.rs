//! Admission and asynchronous execution of batches.
use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::{
    batch::Batch,
    error::{ClosedSnafu, IngestError, Result, ShutDownSnafu},
    gate::{ConcurrencyGate, GatePermit},
    listener::IngestListener,
    metrics::IngestionMetrics,
    outcome::BatchOutcome,
    sink::BulkSink,
    state::EngineState,
};

/// Sends batches to the sink, at most `capacity` at a time.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn BulkSink>,
    gate: ConcurrencyGate,
    state: Arc<EngineState>,
    listener: Arc<dyn IngestListener>,
    metrics: Arc<IngestionMetrics>,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn BulkSink>,
        gate: ConcurrencyGate,
        state: Arc<EngineState>,
        listener: Arc<dyn IngestListener>,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            sink,
            gate,
            state,
            listener,
            metrics,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Admits a batch and starts executing it in the background.
    ///
    /// Waits for a gate slot when `capacity` batches are already in flight.
    /// Returns once the batch is admitted, without waiting for the sink.
    /// Fails with [`IngestError::Closed`] if the engine closes while waiting,
    /// and with [`IngestError::ShutDown`] if `deadline` passes first.
    /// A batch that is not admitted is dropped: its operations count as
    /// failed and the listener is told through `on_fatal`.
    pub async fn dispatch(&self, batch: Batch, deadline: Option<Instant>) -> Result<()> {
        let permit = match self.admit(deadline).await {
            Ok(permit) => permit,
            Err(error) => {
                self.reject(&batch, &error);
                return Err(error);
            }
        };

        let items = batch.len();
        let bytes = batch.estimated_bytes;
        self.state.record_admitted(items, bytes);
        self.metrics.batches.add(1, &[]);
        self.metrics.operations.add(items as u64, &[]);
        self.metrics.bytes.add(bytes, &[]);
        self.metrics
            .admission_wait
            .record(batch.created_at.elapsed().as_secs_f64() * 1000.0, &[]);

        self.listener
            .on_admitted(self.gate.in_flight(), batch.id, items, bytes);

        tokio::spawn(self.clone().execute(batch, permit));

        Ok(())
    }

    async fn admit(&self, deadline: Option<Instant>) -> Result<GatePermit> {
        self.state.check_open()?;

        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let permit = tokio::select! {
            biased;
            _ = self.state.closed() => {
                return ClosedSnafu {}.fail();
            }
            permit = self.gate.acquire() => permit?,
            _ = expired => {
                return ShutDownSnafu {}.fail();
            }
        };

        // A batch that held the last slot may have closed the engine.
        self.state.check_open()?;

        Ok(permit)
    }

    fn reject(&self, batch: &Batch, error: &IngestError) {
        let items = batch.len();
        warn!(batch_id = %batch.id, items, error = %error, "dropping batch that was not admitted");

        self.state.record_dropped(items);
        self.metrics.failed_operations.add(items as u64, &[]);
        self.listener
            .on_fatal(self.gate.in_flight(), batch.id, error);
    }

    async fn execute(self, batch: Batch, permit: GatePermit) {
        let items = batch.len();
        let bytes = batch.estimated_bytes;

        let response = AssertUnwindSafe(self.sink.execute(batch.id, &batch.operations))
            .catch_unwind()
            .await;

        let error = match response {
            Ok(Ok(response)) => {
                let outcome = BatchOutcome::reconcile(&batch, response);

                if !outcome.is_all_ok() {
                    warn!(
                        batch_id = %batch.id,
                        failed = outcome.failed,
                        "operations failed: {}",
                        outcome.failure_message()
                    );
                }

                self.state.record_completed(items, bytes, &outcome);
                self.metrics
                    .failed_operations
                    .add(outcome.failed as u64, &[]);
                self.metrics
                    .batch_duration
                    .record(outcome.took.as_secs_f64() * 1000.0, &[]);

                let concurrency = self.gate.in_flight();
                drop(permit);
                self.listener.on_completed(concurrency, &outcome);
                return;
            }
            Ok(Err(source)) => IngestError::Sink {
                batch_id: batch.id,
                source: Arc::new(source),
            },
            Err(_panic) => IngestError::Internal {
                message: format!("sink panicked while executing batch {}", batch.id),
            },
        };

        error!(batch_id = %batch.id, items, error = %error, "batch failed");
        self.metrics.fatal_batches.add(1, &[]);
        self.metrics.failed_operations.add(items as u64, &[]);
        if !self.state.record_fatal(items, bytes, error.clone()) {
            debug!(batch_id = %batch.id, "engine already closed by an earlier batch");
        }

        let concurrency = self.gate.in_flight();
        drop(permit);
        self.listener.on_fatal(concurrency, batch.id, &error);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        accumulator::Accumulator,
        batch::BatchId,
        listener::NoopListener,
        operation::PendingOperation,
        sink::{BulkResponse, ItemOutcome, SinkError},
    };

    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BulkSink for CountingSink {
        async fn execute(
            &self,
            _batch_id: BatchId,
            operations: &[PendingOperation],
        ) -> Result<BulkResponse, SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::Unavailable {
                    message: "no route to store".to_string(),
                });
            }

            Ok(BulkResponse {
                items: operations
                    .iter()
                    .map(|op| ItemOutcome::Success {
                        id: op.id().unwrap_or_default().to_string(),
                    })
                    .collect(),
                took: Duration::from_millis(1),
            })
        }
    }

    fn dispatcher(fail: bool) -> (Dispatcher, Arc<CountingSink>, Arc<EngineState>) {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail,
        });
        let state = Arc::new(EngineState::new());
        let dispatcher = Dispatcher::new(
            sink.clone(),
            ConcurrencyGate::new(2),
            state.clone(),
            Arc::new(NoopListener),
            Arc::new(IngestionMetrics::default()),
        );
        (dispatcher, sink, state)
    }

    fn batch(id: u64, n: usize) -> Batch {
        let acc = Accumulator::new();
        for i in 0..n {
            acc.add(PendingOperation::index("test", Some(i.to_string()), "{}"))
                .unwrap();
        }
        Batch::new(BatchId::new(id), acc.take_all())
    }

    #[tokio::test]
    async fn test_dispatch_executes_batch() {
        let (dispatcher, sink, state) = dispatcher(false);
        dispatcher.dispatch(batch(1, 5), None).await.unwrap();

        assert!(dispatcher.gate().drain(Duration::from_secs(5)).await);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        let counters = state.counters();
        assert_eq!(counters.submitted, 5);
        assert_eq!(counters.succeeded, 5);
        assert_eq!(counters.outstanding_docs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_deadline_drops_batch() {
        let (dispatcher, sink, state) = dispatcher(false);
        let _first = dispatcher.gate().acquire().await.unwrap();
        let _second = dispatcher.gate().acquire().await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let result = dispatcher.dispatch(batch(1, 4), Some(deadline)).await;

        assert!(matches!(result, Err(IngestError::ShutDown)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        let counters = state.counters();
        assert_eq!(counters.submitted, 0);
        assert_eq!(counters.failed, 4);
        assert!(!state.is_closed());
    }

    #[tokio::test]
    async fn test_fatal_error_closes_and_rejects_dispatch() {
        let (dispatcher, sink, state) = dispatcher(true);
        dispatcher.dispatch(batch(1, 3), None).await.unwrap();

        assert!(dispatcher.gate().drain(Duration::from_secs(5)).await);
        assert!(state.is_closed());
        assert_eq!(state.counters().failed, 3);
        assert_eq!(dispatcher.gate().in_flight(), 0);

        let result = dispatcher.dispatch(batch(2, 3), None).await;
        assert!(matches!(result, Err(IngestError::Closed)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        // The rejected batch is accounted for without replacing the first error.
        let counters = state.counters();
        assert_eq!(counters.submitted, 3);
        assert_eq!(counters.failed, 6);
        assert!(matches!(
            state.last_error(),
            Some(IngestError::Sink { batch_id, .. }) if batch_id == BatchId::new(1)
        ));
    }
}
