//! Operational-transformation core for real-time collaborative text editing.
//!
//! Several users edit one plain-text document at once. Every edit is an
//! [`Operation`] computed against some document version; the document folds
//! it through everything applied since that version so all replicas converge
//! to the same content whatever the arrival order.
//!
//! # Modules
//!
//! - `ids`: Identifier newtypes for documents, sessions, users and operations
//! - `operation`: Operation kinds and payloads
//! - `transform`: Pairwise transformation rules
//! - `document`: Versioned document with a bounded operation log
//! - `lock`: Named region locks
//! - `presence`: Cursors, selections and liveness of session members
//! - `session`: Editing rooms and their outbound channels
//! - `offline`: Replay of buffered operations and the client-side queue
//! - `merge`: Conflict detection and resolution for offline batches
//! - `storage`: Snapshot persistence backends
//! - `message`: Wire messages exchanged with the transport
//! - `config`: Engine configuration
//! - `engine`: Multi-document facade used by the transport
//! - `error`: Error types for the crate
//!
//! # Example
//!
//! ```
//! use ot_collab::{Document, Operation};
//!
//! let mut doc = Document::with_content("notes", "Hello ");
//!
//! // Two users edit version 0 concurrently
//! doc.apply_operation(&Operation::insert("alice", 0, 6, "World")).unwrap();
//! doc.apply_operation(&Operation::insert("bob", 0, 6, "!")).unwrap();
//!
//! assert_eq!(doc.version(), 2);
//! assert_eq!(doc.replay(), doc.content());
//! ```

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod ids;
pub mod lock;
pub mod merge;
pub mod message;
pub mod offline;
pub mod operation;
pub mod presence;
pub mod session;
pub mod storage;
pub mod transform;

// Re-export commonly used types
pub use config::{DocumentConfig, EngineConfig, PresenceConfig, SessionConfig};
pub use document::{Comment, Document, DocumentSnapshot, FormatSpan, LoggedOperation};
pub use engine::{CollabEngine, EngineStats};
pub use error::{CollabError, CollabResult};
pub use ids::{DocId, OpId, SessionId, UserId};
pub use lock::{LockManager, RegionLock};
pub use merge::{Conflict, ConflictKind, ConflictResolution, MergeOutcome};
pub use message::{IncomingMessage, OutgoingMessage, WireEnvelope};
pub use offline::{ConnectionStatus, OfflineQueue, SyncReport, UnsyncedOperation};
pub use operation::{OpData, OpKind, Operation};
pub use presence::{Capabilities, PresenceTracker, User};
pub use session::Session;
pub use storage::{DocumentStore, FileDocumentStore, MemoryDocumentStore, StorageError};
pub use transform::{rebase, transform, TransformGap};
