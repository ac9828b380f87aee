//! Document storage abstraction.
//!
//! The engine loads a document snapshot the first time a session touches the
//! document and saves a fresh snapshot after every logged mutation. Backends
//! implement [`DocumentStore`]; two are provided:
//!
//! - [`MemoryDocumentStore`] for tests and ephemeral servers
//! - [`FileDocumentStore`] writing one JSON file per document

mod file_store;
mod memory_store;

pub use crate::document::DocumentSnapshot;
pub use file_store::FileDocumentStore;
pub use memory_store::MemoryDocumentStore;

use crate::ids::DocId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored document is not usable
    #[error("Corrupted document {doc_id}: {reason}")]
    Corrupted { doc_id: DocId, reason: String },

    /// Internal storage error
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for document storage backends
///
/// Methods take `&self`; implementations use interior mutability and must be
/// safe to share across tasks behind an `Arc`.
pub trait DocumentStore: Send + Sync {
    /// Load the latest snapshot of a document, `None` if it was never saved
    fn load_document(&self, doc_id: &DocId) -> StorageResult<Option<DocumentSnapshot>>;

    /// Replace the stored snapshot of a document
    fn save_document(&self, snapshot: &DocumentSnapshot) -> StorageResult<()>;

    /// Remove a document. Removing a missing document is not an error.
    fn delete_document(&self, doc_id: &DocId) -> StorageResult<()>;

    /// Check whether a document has been saved
    fn document_exists(&self, doc_id: &DocId) -> StorageResult<bool> {
        Ok(self.load_document(doc_id)?.is_some())
    }
}
