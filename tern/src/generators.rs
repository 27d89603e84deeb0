//! Synthetic document generators.
use std::{
    ops::RangeInclusive,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::distr::{Alphanumeric, SampleString};
use serde_json::json;
use tern_ingest_core::PendingOperation;

/// Generates index and delete operations for one producer.
///
/// Document ids are `<producer>-<sequence>`, so producers never collide.
/// Deletes target documents this producer indexed earlier.
pub struct OperationGenerator {
    producer: usize,
    collections: Vec<String>,
    payload_size: RangeInclusive<usize>,
    delete_ratio: f64,
    auto_ids: bool,
    sequence: u64,
}

impl OperationGenerator {
    pub fn new(
        producer: usize,
        collections: Vec<String>,
        payload_size: RangeInclusive<usize>,
        delete_ratio: f64,
    ) -> Self {
        Self {
            producer,
            collections,
            payload_size,
            delete_ratio,
            auto_ids: false,
            sequence: 0,
        }
    }

    /// Leave ids to the sink. Disables deletes.
    pub fn with_auto_ids(mut self, auto_ids: bool) -> Self {
        self.auto_ids = auto_ids;
        self
    }

    pub fn next_operation(&mut self) -> PendingOperation {
        let collection = self.pick_collection();

        if !self.auto_ids && self.sequence > 0 && rand::random_bool(self.delete_ratio) {
            let target = rand::random_range(0..self.sequence);
            return PendingOperation::delete(collection, self.document_id(target));
        }

        let sequence = self.sequence;
        self.sequence += 1;

        let id = if self.auto_ids {
            None
        } else {
            Some(self.document_id(sequence))
        };

        PendingOperation::index(collection, id, self.document(sequence))
    }

    fn pick_collection(&self) -> String {
        let index = rand::random_range(0..self.collections.len());
        self.collections[index].clone()
    }

    fn document_id(&self, sequence: u64) -> String {
        format!("{}-{}", self.producer, sequence)
    }

    fn document(&self, sequence: u64) -> Vec<u8> {
        let target = rand::random_range(self.payload_size.clone());
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut doc = json!({
            "producer": self.producer,
            "sequence": sequence,
            "timestamp": timestamp,
            "body": "",
        });

        let base_len = doc.to_string().len();
        let body_len = target.saturating_sub(base_len);
        doc["body"] = Alphanumeric
            .sample_string(&mut rand::rng(), body_len)
            .into();

        doc.to_string().into_bytes()
    }
}
