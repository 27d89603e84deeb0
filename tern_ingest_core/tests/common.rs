#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tern_ingest_core::{
    BatchId, BatchOutcome, BulkResponse, BulkSink, IngestError, IngestListener, IngestorOptions,
    ItemOutcome, PendingOperation, ShardId, SinkError,
};
use tokio::sync::Semaphore;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Options with a flush interval long enough to never fire during a test.
pub fn test_options() -> IngestorOptions {
    IngestorOptions::default()
        .with_max_concurrent_batches(4)
        .with_flush_interval(Duration::from_secs(3600))
        .with_max_wait_on_shutdown(TIMEOUT)
}

pub fn index(collection: &str, id: usize, payload_len: usize) -> PendingOperation {
    PendingOperation::index(collection, Some(id.to_string()), vec![b'x'; payload_len])
}

#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub batch_id: BatchId,
    pub ids: Vec<String>,
    pub bytes: u64,
}

/// A sink that records the batches it receives.
///
/// A gated sink holds every batch until [`TestSink::release`] is called.
/// Documents whose id is in the failing set are rejected individually, and
/// the whole batch fails while the sink is fatal.
pub struct TestSink {
    release: Option<Semaphore>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    batches: Mutex<Vec<RecordedBatch>>,
    failing_ids: Mutex<HashSet<String>>,
    fatal: AtomicBool,
    bulk_mode_calls: Mutex<Vec<(String, bool)>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn gated() -> Self {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(release: Option<Semaphore>) -> Self {
        Self {
            release,
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            failing_ids: Mutex::new(HashSet::new()),
            fatal: AtomicBool::new(false),
            bulk_mode_calls: Mutex::new(Vec::new()),
        }
    }

    /// Lets `n` held batches complete.
    pub fn release(&self, n: usize) {
        if let Some(release) = &self.release {
            release.add_permits(n);
        }
    }

    pub fn fail_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut failing = self.failing_ids.lock().unwrap();
        failing.extend(ids.into_iter().map(str::to_string));
    }

    pub fn set_fatal(&self, fatal: bool) {
        self.fatal.store(fatal, Ordering::SeqCst);
    }

    /// Batches received so far, sorted by id.
    pub fn batches(&self) -> Vec<RecordedBatch> {
        let mut batches = self.batches.lock().unwrap().clone();
        batches.sort_by_key(|b| b.batch_id);
        batches
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(|b| b.ids.len()).collect()
    }

    pub fn batch_ids(&self) -> Vec<u64> {
        self.batches().iter().map(|b| b.batch_id.as_u64()).collect()
    }

    pub fn started(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn operation_count(&self) -> usize {
        self.batches().iter().map(|b| b.ids.len()).sum()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn bulk_mode_calls(&self) -> Vec<(String, bool)> {
        self.bulk_mode_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkSink for TestSink {
    async fn execute(
        &self,
        batch_id: BatchId,
        operations: &[PendingOperation],
    ) -> Result<BulkResponse, SinkError> {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        self.batches.lock().unwrap().push(RecordedBatch {
            batch_id,
            ids: operations
                .iter()
                .map(|op| op.id().unwrap_or_default().to_string())
                .collect(),
            bytes: operations.iter().map(PendingOperation::estimated_size).sum(),
        });

        if let Some(release) = &self.release {
            release.acquire().await.expect("release semaphore").forget();
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.fatal.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable {
                message: "no route to store".to_string(),
            });
        }

        let failing = self.failing_ids.lock().unwrap().clone();
        let items = operations
            .iter()
            .enumerate()
            .map(|(position, op)| {
                let id = op.id().unwrap_or_default().to_string();
                if failing.contains(&id) {
                    ItemOutcome::Failure {
                        shard: ShardId {
                            collection: op.collection().to_string(),
                            shard: position as u32 % 3,
                        },
                        message: "version conflict".to_string(),
                    }
                } else {
                    ItemOutcome::Success { id }
                }
            })
            .collect();

        Ok(BulkResponse {
            items,
            took: Duration::from_millis(3),
        })
    }

    async fn set_bulk_mode(&self, collection: &str, enabled: bool) -> Result<(), SinkError> {
        self.bulk_mode_calls
            .lock()
            .unwrap()
            .push((collection.to_string(), enabled));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Admitted {
        batch_id: BatchId,
        items: usize,
        bytes: u64,
        concurrency: usize,
    },
    Completed {
        batch_id: BatchId,
        succeeded: usize,
        failed: usize,
    },
    Fatal {
        batch_id: BatchId,
        message: String,
    },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<ListenerEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, ListenerEvent::Admitted { .. }))
            .collect()
    }
}

impl IngestListener for RecordingListener {
    fn on_admitted(&self, concurrency: usize, batch_id: BatchId, items: usize, bytes: u64) {
        self.events.lock().unwrap().push(ListenerEvent::Admitted {
            batch_id,
            items,
            bytes,
            concurrency,
        });
    }

    fn on_completed(&self, _concurrency: usize, outcome: &BatchOutcome) {
        self.events.lock().unwrap().push(ListenerEvent::Completed {
            batch_id: outcome.batch_id,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
        });
    }

    fn on_fatal(&self, _concurrency: usize, batch_id: BatchId, error: &IngestError) {
        self.events.lock().unwrap().push(ListenerEvent::Fatal {
            batch_id,
            message: error.to_string(),
        });
    }
}

/// Polls `condition` until it holds. Panics after [`TIMEOUT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
