//! In-memory document store.
//!
//! Intended for tests and servers that do not need persistence across
//! restarts. Snapshots are cloned in and out, so callers never share state
//! with the store.

use super::{DocumentSnapshot, DocumentStore, StorageError, StorageResult};
use crate::ids::DocId;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory implementation of [`DocumentStore`]
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocId, DocumentSnapshot>>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of all stored documents
    pub fn document_ids(&self) -> Vec<DocId> {
        self.read()
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, HashMap<DocId, DocumentSnapshot>>> {
        self.documents
            .read()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, HashMap<DocId, DocumentSnapshot>>> {
        self.documents
            .write()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load_document(&self, doc_id: &DocId) -> StorageResult<Option<DocumentSnapshot>> {
        Ok(self.read()?.get(doc_id).cloned())
    }

    fn save_document(&self, snapshot: &DocumentSnapshot) -> StorageResult<()> {
        self.write()?.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    fn delete_document(&self, doc_id: &DocId) -> StorageResult<()> {
        self.write()?.remove(doc_id);
        Ok(())
    }

    fn document_exists(&self, doc_id: &DocId) -> StorageResult<bool> {
        Ok(self.read()?.contains_key(doc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::operation::Operation;

    fn sample_snapshot(id: &str) -> DocumentSnapshot {
        let mut doc = Document::new(id);
        doc.apply_operation(&Operation::insert("alice", 0, 0, "hello"))
            .unwrap();
        doc.snapshot()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = MemoryDocumentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.load_document(&DocId::from("doc1")).unwrap(), None);
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryDocumentStore::new();
        let snapshot = sample_snapshot("doc1");
        store.save_document(&snapshot).unwrap();

        let loaded = store.load_document(&DocId::from("doc1")).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(store.document_exists(&DocId::from("doc1")).unwrap());
    }

    #[test]
    fn test_save_replaces_previous() {
        let store = MemoryDocumentStore::new();
        let mut doc = Document::new("doc1");
        store.save_document(&doc.snapshot()).unwrap();

        doc.apply_operation(&Operation::insert("alice", 0, 0, "x"))
            .unwrap();
        store.save_document(&doc.snapshot()).unwrap();

        let loaded = store.load_document(&DocId::from("doc1")).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_document() {
        let store = MemoryDocumentStore::new();
        store.save_document(&sample_snapshot("doc1")).unwrap();
        store.save_document(&sample_snapshot("doc2")).unwrap();

        store.delete_document(&DocId::from("doc1")).unwrap();
        assert!(!store.document_exists(&DocId::from("doc1")).unwrap());
        assert_eq!(store.document_ids(), vec![DocId::from("doc2")]);

        // Deleting again is fine
        store.delete_document(&DocId::from("doc1")).unwrap();
    }
}
