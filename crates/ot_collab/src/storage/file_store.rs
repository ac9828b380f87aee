//! File-based document store.
//!
//! # Directory Structure
//!
//! ```text
//! data/
//! ├── {stem}.json        # Latest document snapshot
//! └── {stem}.json.tmp    # Present only while a save is in flight
//! ```
//!
//! `{stem}` is the document id with every byte outside `[a-z0-9-]` written
//! as `_` plus two hex digits.
//!
//! Saves write a temp file and rename it over the previous snapshot, so a
//! crash mid-save leaves the last complete snapshot in place.

use super::{DocumentSnapshot, DocumentStore, StorageError, StorageResult};
use crate::ids::DocId;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SNAPSHOT_EXTENSION: &str = "json";

/// File-based implementation of [`DocumentStore`]
///
/// Writes are serialized through one mutex; reads go straight to disk.
#[derive(Debug)]
pub struct FileDocumentStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDocumentStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        tracing::debug!(path = %base_path.display(), "Opened file document store");

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// IDs of all documents with a snapshot on disk
    pub fn document_ids(&self) -> StorageResult<Vec<DocId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            // Read the real id from the snapshot rather than decoding the name
            if let Some(snapshot) = self.read_snapshot(&path)? {
                ids.push(snapshot.id);
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn snapshot_path(&self, doc_id: &DocId) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", file_stem(doc_id), SNAPSHOT_EXTENSION))
    }

    fn read_snapshot(&self, path: &Path) -> StorageResult<Option<DocumentSnapshot>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(snapshot))
    }
}

impl DocumentStore for FileDocumentStore {
    fn load_document(&self, doc_id: &DocId) -> StorageResult<Option<DocumentSnapshot>> {
        let snapshot = self.read_snapshot(&self.snapshot_path(doc_id))?;
        match snapshot {
            Some(snapshot) if snapshot.id != *doc_id => Err(StorageError::Corrupted {
                doc_id: doc_id.clone(),
                reason: format!("file holds document {}", snapshot.id),
            }),
            other => Ok(other),
        }
    }

    fn save_document(&self, snapshot: &DocumentSnapshot) -> StorageResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Internal("file store lock poisoned".to_string()))?;

        let snapshot_path = self.snapshot_path(&snapshot.id);
        let temp_path = snapshot_path.with_extension("json.tmp");

        // Write to temp file first
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
        }

        // Atomic rename
        fs::rename(&temp_path, &snapshot_path)?;

        tracing::debug!(
            doc_id = %snapshot.id,
            version = snapshot.version,
            "Saved document snapshot"
        );
        Ok(())
    }

    fn delete_document(&self, doc_id: &DocId) -> StorageResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Internal("file store lock poisoned".to_string()))?;

        match fs::remove_file(self.snapshot_path(doc_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn document_exists(&self, doc_id: &DocId) -> StorageResult<bool> {
        Ok(self.snapshot_path(doc_id).exists())
    }
}

/// Map a document id onto a safe, unique file stem.
///
/// Lowercase ASCII letters, digits and `-` are kept; every other byte becomes
/// `_` plus two hex digits. Distinct ids never share a stem, also on
/// case-insensitive filesystems.
fn file_stem(doc_id: &DocId) -> String {
    let mut stem = String::with_capacity(doc_id.as_str().len());
    for byte in doc_id.as_str().bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}
