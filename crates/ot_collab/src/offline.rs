//! Offline editing support.
//!
//! Two halves:
//!
//! - [`OfflineQueue`] runs on the client. It tracks the connection status,
//!   buffers operations made while disconnected (all against the last
//!   server version seen) and persists them to disk so a restart does not
//!   lose work.
//! - [`replay_offline`] runs in the engine. It replays a buffered batch over
//!   everything the server recorded in the meantime and reports which
//!   operations landed.
//!
//! Buffered operations are sequential on the author's side, so the replay
//! never transforms them against each other. If one of them is refused, the
//! ones after it were still authored assuming it applied; their positions
//! may drift by the refused operation's length.

use crate::document::Document;
use crate::error::CollabError;
use crate::ids::UserId;
use crate::merge::Bridge;
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An operation the server could not apply during sync.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsyncedOperation {
    pub operation: Operation,
    pub error: CollabError,
}

/// Result of replaying an offline batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    /// Reconciled operations as applied, in order
    pub applied: Vec<Operation>,
    /// Operations left out, with the reason
    pub unsynced: Vec<UnsyncedOperation>,
    /// Document version after the replay
    pub version: u64,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.unsynced.is_empty()
    }
}

/// Replay a batch of buffered operations into `document`.
///
/// The batch base is the first operation's base version; operations that
/// claim a different base are refused.
pub fn replay_offline(document: &mut Document, operations: Vec<Operation>) -> SyncReport {
    let mut report = SyncReport {
        version: document.version(),
        ..SyncReport::default()
    };
    let Some(base_version) = operations.first().map(|op| op.base_version) else {
        return report;
    };

    let mut bridge = match Bridge::new(document, base_version) {
        Ok(bridge) => bridge,
        Err(err) => {
            tracing::warn!(
                doc_id = %document.id(),
                base_version,
                error = %err,
                "Offline batch cannot be replayed"
            );
            report.unsynced = operations
                .into_iter()
                .map(|operation| UnsyncedOperation {
                    operation,
                    error: err.clone(),
                })
                .collect();
            return report;
        }
    };

    for op in operations {
        if op.base_version != base_version {
            let error = CollabError::InvalidOperation(format!(
                "offline batch is based on version {} but operation claims {}",
                base_version, op.base_version
            ));
            report.unsynced.push(UnsyncedOperation { operation: op, error });
            continue;
        }

        if let Err(error) = bridge.admit(&op) {
            report.unsynced.push(UnsyncedOperation { operation: op, error });
            continue;
        }

        let (reconciled, next_chain) = match bridge.reconcile(&op) {
            Ok(result) => result,
            Err(gap) => {
                report.unsynced.push(UnsyncedOperation {
                    operation: op,
                    error: gap.into(),
                });
                continue;
            }
        };

        match document.apply_operation(&reconciled.with_base_version(document.version())) {
            Ok(applied) => {
                bridge.commit(next_chain);
                report.applied.push(applied);
            }
            Err(error) => {
                report.unsynced.push(UnsyncedOperation { operation: op, error });
            }
        }
    }

    report.version = document.version();
    tracing::debug!(
        doc_id = %document.id(),
        applied = report.applied.len(),
        unsynced = report.unsynced.len(),
        version = report.version,
        "Replayed offline batch"
    );
    report
}

/// Connection status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Connected to server
    Online,
    /// Disconnected, operations queued locally
    #[default]
    Offline,
    /// Reconnecting after disconnection
    Reconnecting,
    /// Syncing after reconnection
    Syncing,
}

/// Offline errors
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OfflineError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("No storage path configured")]
    NoStoragePath,
}

impl From<std::io::Error> for OfflineError {
    fn from(err: std::io::Error) -> Self {
        OfflineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        OfflineError::Serialization(err.to_string())
    }
}

/// Serializable offline state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineState {
    pub user_id: UserId,
    pub queue: Vec<Operation>,
    pub server_version: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Client-side buffer for operations made while disconnected
#[derive(Debug)]
pub struct OfflineQueue {
    user_id: UserId,
    status: ConnectionStatus,
    queue: Vec<Operation>,
    /// Last document version acknowledged by the server
    server_version: u64,
    last_sync_time: Option<DateTime<Utc>>,
    storage_path: Option<PathBuf>,
    auto_save: bool,
}

impl OfflineQueue {
    /// Create a queue without persistence
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            status: ConnectionStatus::Offline,
            queue: Vec::new(),
            server_version: 0,
            last_sync_time: None,
            storage_path: None,
            auto_save: false,
        }
    }

    /// Create a queue persisted to `path` after every change
    pub fn with_storage(user_id: impl Into<UserId>, path: impl AsRef<Path>) -> Self {
        Self {
            storage_path: Some(path.as_ref().to_path_buf()),
            auto_save: true,
            ..Self::new(user_id)
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        if status == ConnectionStatus::Offline {
            self.auto_save();
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.status, ConnectionStatus::Offline)
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, ConnectionStatus::Online)
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    /// Last document version acknowledged by the server
    pub fn server_version(&self) -> u64 {
        self.server_version
    }

    /// Record a version acknowledged while online.
    pub fn update_server_version(&mut self, version: u64) {
        self.server_version = self.server_version.max(version);
    }

    // ========== Offline Queue Management ==========

    /// Buffer an operation, rebased to the last acknowledged version
    pub fn queue_operation(&mut self, op: Operation) {
        self.queue.push(op.with_base_version(self.server_version));
        self.auto_save();
    }

    pub fn queued_operations(&self) -> &[Operation] {
        &self.queue
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.auto_save();
    }

    /// Operations to send on reconnect; moves the queue into `Syncing`
    pub fn begin_sync(&mut self) -> Vec<Operation> {
        self.status = ConnectionStatus::Syncing;
        self.queue.clone()
    }

    /// Fold a sync report back into the queue.
    ///
    /// Every operation the report mentions leaves the queue. The unsynced
    /// ones are returned as submitted: their positions refer to the old base,
    /// so the caller has to re-author them against the new server version.
    /// Operations queued after [`begin_sync`](Self::begin_sync) stay.
    pub fn complete_sync(&mut self, report: &SyncReport) -> Vec<Operation> {
        let (settled, kept): (Vec<Operation>, Vec<Operation>) =
            std::mem::take(&mut self.queue).into_iter().partition(|queued| {
                report.applied.iter().any(|applied| applied.id == queued.id)
                    || report
                        .unsynced
                        .iter()
                        .any(|unsynced| unsynced.operation.id == queued.id)
            });
        self.queue = kept;

        let unsynced: Vec<Operation> = settled
            .into_iter()
            .filter(|op| !report.applied.iter().any(|applied| applied.id == op.id))
            .collect();
        if !unsynced.is_empty() {
            tracing::info!(
                user_id = %self.user_id,
                count = unsynced.len(),
                version = report.version,
                "Offline operations need re-authoring"
            );
        }

        self.server_version = report.version;
        self.last_sync_time = Some(Utc::now());
        self.status = ConnectionStatus::Online;
        self.auto_save();
        unsynced
    }

    // ========== Persistence ==========

    /// Flush queue to persistent storage
    pub fn save_queue(&self) -> Result<(), OfflineError> {
        let path = self.storage_path.as_ref().ok_or(OfflineError::NoStoragePath)?;
        let json = serde_json::to_string_pretty(&self.state())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load queue from persistent storage. A missing file is not an error.
    pub fn load_queue(&mut self) -> Result<(), OfflineError> {
        let path = self.storage_path.as_ref().ok_or(OfflineError::NoStoragePath)?;
        if !path.exists() {
            return Ok(());
        }
        let json = std::fs::read_to_string(path)?;
        let state: OfflineState = serde_json::from_str(&json)?;
        self.restore_state(state);
        Ok(())
    }

    pub fn state(&self) -> OfflineState {
        OfflineState {
            user_id: self.user_id.clone(),
            queue: self.queue.clone(),
            server_version: self.server_version,
            last_sync_time: self.last_sync_time,
        }
    }

    pub fn restore_state(&mut self, state: OfflineState) {
        self.user_id = state.user_id;
        self.queue = state.queue;
        self.server_version = state.server_version;
        self.last_sync_time = state.last_sync_time;
    }

    fn auto_save(&self) {
        if !self.auto_save {
            return;
        }
        if let Err(e) = self.save_queue() {
            tracing::warn!(user_id = %self.user_id, "Failed to persist offline queue: {}", e);
        }
    }

    // ========== Status ==========

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.last_sync_time
    }

    /// Seconds since the last completed sync
    pub fn seconds_since_sync(&self, now: DateTime<Utc>) -> Option<u64> {
        self.last_sync_time
            .map(|at| now.signed_duration_since(at).num_seconds().max(0) as u64)
    }
}
