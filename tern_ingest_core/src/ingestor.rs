use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use snafu::ResultExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    accumulator::Accumulator,
    batch::{Batch, BatchId},
    cutter::{BatchCutter, CutReason},
    dispatcher::Dispatcher,
    error::{BulkModeSnafu, IngestError, Result, ValidationSnafu},
    gate::ConcurrencyGate,
    listener::{IngestListener, LoggingListener},
    metrics::IngestionMetrics,
    operation::PendingOperation,
    options::IngestorOptions,
    sink::BulkSink,
    state::{EngineCounters, EngineState},
};

/// Accepts write operations from any number of producers and sends them to
/// the sink in bounded batches.
///
/// Batches are cut when the pending operations reach the action or volume
/// limit, on [`BulkIngestor::flush`], and periodically by
/// [`run_background_flusher`].
#[derive(Clone)]
pub struct BulkIngestor {
    inner: Arc<IngestorInner>,
}

struct IngestorInner {
    options: IngestorOptions,
    accumulator: Accumulator,
    cutter: BatchCutter,
    dispatcher: Dispatcher,
    state: Arc<EngineState>,
    sink: Arc<dyn BulkSink>,
    shutdown: CancellationToken,
}

/// A snapshot of the ingestor activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorStats {
    pub counters: EngineCounters,
    /// Batches sent to the sink and not yet completed.
    pub in_flight: usize,
    /// Operations waiting to be cut into a batch.
    pub queued_operations: usize,
    /// Estimated size of the queued operations.
    pub queued_bytes: u64,
    /// Collections in bulk mode.
    pub bulk_collections: Vec<String>,
}

/// Periodically cuts pending operations into batches until `ct` is
/// cancelled or the ingestor shuts down.
pub async fn run_background_flusher(ingestor: BulkIngestor, ct: CancellationToken) -> Result<()> {
    ingestor.run_flusher(ct).await
}

impl BulkIngestor {
    /// Creates an ingestor that logs batch events.
    pub fn new(sink: Arc<dyn BulkSink>, options: IngestorOptions) -> Result<Self> {
        Self::new_with_listener(sink, options, Arc::new(LoggingListener))
    }

    pub fn new_with_listener(
        sink: Arc<dyn BulkSink>,
        options: IngestorOptions,
        listener: Arc<dyn IngestListener>,
    ) -> Result<Self> {
        options.validate()?;

        let state = Arc::new(EngineState::new());
        let gate = ConcurrencyGate::new(options.max_concurrent_batches);
        let dispatcher = Dispatcher::new(
            sink.clone(),
            gate,
            state.clone(),
            listener,
            Arc::new(IngestionMetrics::default()),
        );
        let cutter = BatchCutter::new(&options);

        let inner = IngestorInner {
            options,
            accumulator: Accumulator::new(),
            cutter,
            dispatcher,
            state,
            sink,
            shutdown: CancellationToken::new(),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn options(&self) -> &IngestorOptions {
        &self.inner.options
    }

    /// Queues an operation.
    ///
    /// If the queue reaches the action or volume limit, batches are cut and
    /// dispatched before returning. This waits only when the maximum number
    /// of batches is already in flight, never for the sink to complete.
    pub async fn add(&self, operation: PendingOperation) -> Result<()> {
        self.inner.state.check_accepting()?;
        self.inner.accumulator.add(operation)?;

        while let Some(reason) = self.inner.cutter.trigger(&self.inner.accumulator) {
            let Some(batch) = self.inner.cutter.cut(&self.inner.accumulator) else {
                break;
            };
            self.dispatch(batch, reason, None).await?;
        }

        Ok(())
    }

    /// Queues a document to index. The sink assigns an id if `id` is `None`.
    pub async fn add_index(
        &self,
        collection: impl Into<String>,
        doc_type: Option<String>,
        id: Option<String>,
        source: impl Into<Bytes>,
    ) -> Result<()> {
        let operation = PendingOperation::index(collection, id, source).with_doc_type(doc_type);
        self.add(operation).await
    }

    /// Queues a document deletion.
    pub async fn add_delete(
        &self,
        collection: impl Into<String>,
        doc_type: Option<String>,
        id: impl Into<String>,
    ) -> Result<()> {
        let operation = PendingOperation::delete(collection, id).with_doc_type(doc_type);
        self.add(operation).await
    }

    /// Cuts every queued operation into batches regardless of the limits.
    ///
    /// Returns the ids of the dispatched batches. Fails if nothing is queued.
    pub async fn flush(&self) -> Result<Vec<BatchId>> {
        self.inner.state.check_accepting()?;

        if self.inner.accumulator.is_empty() {
            return ValidationSnafu {
                message: "no pending operations to flush".to_string(),
            }
            .fail();
        }

        self.cut_all(CutReason::Flush, None).await
    }

    /// Waits until every batch in flight has completed, or the timeout expires.
    ///
    /// Returns true if no batch is in flight. Batches still running when the
    /// timeout expires keep running in the background.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.inner.dispatcher.gate().drain(timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.is_shut_down()
    }

    /// The batch-fatal error that closed the ingestor, if any.
    pub fn last_error(&self) -> Option<IngestError> {
        self.inner.state.last_error()
    }

    /// Accepts operations again after a batch-fatal error.
    ///
    /// Counters are kept. Operations queued before the error are still queued.
    pub fn reopen(&self) {
        if self.inner.state.is_closed() {
            info!("reopening ingestor");
        }
        self.inner.state.reopen();
    }

    pub fn stats(&self) -> IngestorStats {
        let (queued_operations, queued_bytes) = self.inner.accumulator.levels();
        IngestorStats {
            counters: self.inner.state.counters(),
            in_flight: self.inner.dispatcher.gate().in_flight(),
            queued_operations,
            queued_bytes,
            bulk_collections: self.inner.state.bulk_collections(),
        }
    }

    /// Puts a collection in bulk mode. Does nothing if it already is.
    pub async fn start_bulk(&self, collection: &str) -> Result<()> {
        self.inner.state.check_accepting()?;

        if !self.inner.state.start_bulk(collection) {
            return Ok(());
        }

        if let Err(error) = self.inner.sink.set_bulk_mode(collection, true).await {
            self.inner.state.stop_bulk(collection);
            return Err(error).context(BulkModeSnafu { collection });
        }

        info!(collection, "started bulk mode");
        Ok(())
    }

    /// Takes a collection out of bulk mode. Does nothing if it is not in bulk mode.
    pub async fn stop_bulk(&self, collection: &str) -> Result<()> {
        if !self.inner.state.stop_bulk(collection) {
            return Ok(());
        }

        self.inner
            .sink
            .set_bulk_mode(collection, false)
            .await
            .context(BulkModeSnafu { collection })?;

        info!(collection, "stopped bulk mode");
        Ok(())
    }

    /// Stops accepting operations, flushes what is queued and waits up to
    /// `max_wait_on_shutdown` for in-flight batches.
    ///
    /// Returns true if every batch completed in time.
    pub async fn shutdown(&self) -> bool {
        let gate = self.inner.dispatcher.gate();
        if !self.inner.state.begin_shutdown() {
            return gate.in_flight() == 0;
        }

        info!("shutting down ingestor");
        // Adds racing with shutdown either land before the seal and are
        // flushed below, or fail with `ShutDown`.
        self.inner.accumulator.seal();
        self.inner.shutdown.cancel();
        let deadline = Instant::now() + self.inner.options.max_wait_on_shutdown;

        if self.inner.state.is_closed() {
            let dropped = self.inner.accumulator.take_all().len();
            if dropped > 0 {
                warn!(dropped, "ingestor is closed, dropping queued operations");
                self.inner.state.record_dropped(dropped);
            }
        } else {
            match self.cut_all(CutReason::Flush, Some(deadline)).await {
                Ok(ids) => debug!(batches = ids.len(), "flushed queued operations"),
                Err(error) => warn!(error = %error, "failed to flush queued operations"),
            }

            let dropped = self.inner.accumulator.take_all().len();
            if dropped > 0 {
                warn!(dropped, "dropping operations that could not be flushed");
                self.inner.state.record_dropped(dropped);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let drained = gate.drain(remaining).await;
        if !drained {
            warn!(
                in_flight = gate.in_flight(),
                "batches still in flight after shutdown timeout"
            );
        }
        gate.close();

        for collection in self.inner.state.bulk_collections() {
            if let Err(error) = self.stop_bulk(&collection).await {
                warn!(collection = %collection, error = %error, "failed to stop bulk mode");
            }
        }

        info!(drained, "ingestor shut down");
        drained
    }

    async fn cut_all(&self, reason: CutReason, deadline: Option<Instant>) -> Result<Vec<BatchId>> {
        let mut ids = Vec::new();
        while let Some(batch) = self.inner.cutter.cut(&self.inner.accumulator) {
            ids.push(self.dispatch(batch, reason, deadline).await?);
        }
        Ok(ids)
    }

    async fn dispatch(
        &self,
        batch: Batch,
        reason: CutReason,
        deadline: Option<Instant>,
    ) -> Result<BatchId> {
        let batch_id = batch.id;
        let items = batch.len();
        debug!(batch_id = %batch_id, items, reason = %reason, "cut batch");

        self.inner.dispatcher.dispatch(batch, deadline).await?;
        Ok(batch_id)
    }

    async fn run_flusher(&self, ct: CancellationToken) -> Result<()> {
        let shutdown = self.inner.shutdown.clone();
        let mut interval = tokio::time::interval(self.inner.options.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    if self.inner.accumulator.is_empty() || self.inner.state.is_closed() {
                        continue;
                    }

                    match self.cut_all(CutReason::Flush, None).await {
                        Ok(ids) => debug!(batches = ids.len(), "timer flush"),
                        Err(error) => warn!(error = %error, "timer flush failed"),
                    }
                }
            }
        }

        debug!("background flusher stopped");
        Ok(())
    }
}
