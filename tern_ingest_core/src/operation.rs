//! Write operations accepted by the ingestor.
use bytes::Bytes;

use crate::error::{Result, ValidationSnafu};

/// Fixed size accounted for every operation on top of its payload.
///
/// This covers the action metadata (collection, type, id) that travels with
/// each operation in the bulk request.
pub const OPERATION_OVERHEAD_BYTES: u64 = 50;

/// A single write operation waiting to be batched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    /// Index (create or replace) a document.
    Index(IndexOperation),
    /// Delete a document.
    Delete(DeleteOperation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOperation {
    /// The target collection.
    pub collection: String,
    /// The document type, if the store distinguishes them.
    pub doc_type: Option<String>,
    /// The document id. The sink assigns one when missing.
    pub id: Option<String>,
    /// The document source.
    pub source: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOperation {
    /// The target collection.
    pub collection: String,
    /// The document type, if the store distinguishes them.
    pub doc_type: Option<String>,
    /// The document id.
    pub id: String,
}

impl PendingOperation {
    pub fn index(
        collection: impl Into<String>,
        id: Option<String>,
        source: impl Into<Bytes>,
    ) -> Self {
        PendingOperation::Index(IndexOperation {
            collection: collection.into(),
            doc_type: None,
            id,
            source: source.into(),
        })
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        PendingOperation::Delete(DeleteOperation {
            collection: collection.into(),
            doc_type: None,
            id: id.into(),
        })
    }

    /// Change the document type of the operation.
    pub fn with_doc_type(mut self, doc_type: Option<String>) -> Self {
        match &mut self {
            PendingOperation::Index(op) => op.doc_type = doc_type,
            PendingOperation::Delete(op) => op.doc_type = doc_type,
        }
        self
    }

    pub fn collection(&self) -> &str {
        match self {
            PendingOperation::Index(op) => &op.collection,
            PendingOperation::Delete(op) => &op.collection,
        }
    }

    pub fn doc_type(&self) -> Option<&str> {
        match self {
            PendingOperation::Index(op) => op.doc_type.as_deref(),
            PendingOperation::Delete(op) => op.doc_type.as_deref(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            PendingOperation::Index(op) => op.id.as_deref(),
            PendingOperation::Delete(op) => Some(&op.id),
        }
    }

    /// Returns the payload length in bytes. Deletes carry no payload.
    pub fn payload_len(&self) -> u64 {
        match self {
            PendingOperation::Index(op) => op.source.len() as u64,
            PendingOperation::Delete(_) => 0,
        }
    }

    /// Returns the number of bytes the operation accounts for in a batch.
    pub fn estimated_size(&self) -> u64 {
        self.payload_len() + OPERATION_OVERHEAD_BYTES
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection().trim().is_empty() {
            return ValidationSnafu {
                message: "operation does not specify a target collection".to_string(),
            }
            .fail();
        }

        if self.doc_type().is_some_and(|t| t.trim().is_empty()) {
            return ValidationSnafu {
                message: format!(
                    "operation on collection {} has an empty document type",
                    self.collection()
                ),
            }
            .fail();
        }

        match self {
            PendingOperation::Index(op) => {
                if op.id.as_deref().is_some_and(|id| id.is_empty()) {
                    return ValidationSnafu {
                        message: format!(
                            "index operation on collection {} has an empty id",
                            op.collection
                        ),
                    }
                    .fail();
                }
            }
            PendingOperation::Delete(op) => {
                if op.id.is_empty() {
                    return ValidationSnafu {
                        message: format!(
                            "delete operation on collection {} requires an id",
                            op.collection
                        ),
                    }
                    .fail();
                }
            }
        }

        Ok(())
    }
}
