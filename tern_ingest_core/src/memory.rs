//! A sink that keeps documents in memory.
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};
use ulid::Ulid;

use crate::{
    batch::BatchId,
    operation::PendingOperation,
    sink::{BulkResponse, BulkSink, ItemOutcome, ShardId, SinkError},
};

const DEFAULT_SHARDS: u32 = 5;

/// Stores documents per collection in concurrent maps.
///
/// Writes to a collection can be blocked, in which case every operation on it
/// fails individually. Marking the sink unavailable makes every batch fail as
/// a whole.
#[derive(Debug)]
pub struct InMemorySink {
    collections: DashMap<String, DashMap<String, Bytes>>,
    blocked: DashSet<String>,
    bulk_mode: DashSet<String>,
    available: AtomicBool,
    shards: u32,
    latency: Option<Duration>,
    executed_batches: AtomicU64,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::new_with_shards(DEFAULT_SHARDS)
    }

    pub fn new_with_shards(shards: u32) -> Self {
        Self {
            collections: DashMap::new(),
            blocked: DashSet::new(),
            bulk_mode: DashSet::new(),
            available: AtomicBool::new(true),
            shards: shards.max(1),
            latency: None,
            executed_batches: AtomicU64::new(0),
        }
    }

    /// Change the simulated latency of every batch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every write to `collection` fail.
    pub fn block_writes(&self, collection: impl Into<String>) {
        self.blocked.insert(collection.into());
    }

    pub fn unblock_writes(&self, collection: &str) {
        self.blocked.remove(collection);
    }

    /// Simulates losing or regaining the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Bytes> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id).map(|doc| doc.value().clone()))
    }

    /// Number of documents stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn is_bulk_mode(&self, collection: &str) -> bool {
        self.bulk_mode.contains(collection)
    }

    /// Number of batches executed, including those with item failures.
    pub fn executed_batches(&self) -> u64 {
        self.executed_batches.load(Ordering::SeqCst)
    }

    pub fn shard_for(&self, collection: &str, id: &str) -> ShardId {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let shard = (hasher.finish() % self.shards as u64) as u32;

        ShardId {
            collection: collection.to_string(),
            shard,
        }
    }

    fn apply(&self, operation: &PendingOperation) -> ItemOutcome {
        let collection = operation.collection();

        match operation {
            PendingOperation::Index(op) => {
                let id = op
                    .id
                    .clone()
                    .unwrap_or_else(|| Ulid::new().to_string());

                if self.blocked.contains(collection) {
                    return ItemOutcome::Failure {
                        shard: self.shard_for(collection, &id),
                        message: format!("collection {collection} is blocked for writes"),
                    };
                }

                self.collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(id.clone(), op.source.clone());

                ItemOutcome::Success { id }
            }
            PendingOperation::Delete(op) => {
                if self.blocked.contains(collection) {
                    return ItemOutcome::Failure {
                        shard: self.shard_for(collection, &op.id),
                        message: format!("collection {collection} is blocked for writes"),
                    };
                }

                if let Some(docs) = self.collections.get(collection) {
                    docs.remove(&op.id);
                }

                ItemOutcome::Success { id: op.id.clone() }
            }
        }
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BulkSink for InMemorySink {
    async fn execute(
        &self,
        batch_id: BatchId,
        operations: &[PendingOperation],
    ) -> Result<BulkResponse, SinkError> {
        let start = Instant::now();

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable {
                message: format!("no route to store for batch {batch_id}"),
            });
        }

        let items = operations
            .iter()
            .map(|operation| self.apply(operation))
            .collect::<Vec<_>>();

        self.executed_batches.fetch_add(1, Ordering::SeqCst);
        debug!(batch_id = %batch_id, items = items.len(), "executed batch in memory");

        Ok(BulkResponse {
            items,
            took: start.elapsed(),
        })
    }

    async fn set_bulk_mode(&self, collection: &str, enabled: bool) -> Result<(), SinkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable {
                message: format!("cannot change bulk mode of {collection}"),
            });
        }

        if enabled {
            self.bulk_mode.insert(collection.to_string());
        } else {
            self.bulk_mode.remove(collection);
        }

        info!(collection, enabled, "bulk mode changed");
        Ok(())
    }
}
