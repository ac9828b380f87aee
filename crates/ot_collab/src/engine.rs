//! Collaboration engine.
//!
//! [`CollabEngine`] is the entry point for the transport layer. It owns an
//! arena of open documents and the sessions editing them:
//!
//! - Routing incoming operations to the right document
//! - Persisting snapshots after logged mutations
//! - Fanning reconciled operations out to every other member
//! - Offline sync, conflict merge and lock housekeeping
//!
//! Each document is its own serialization point. A session lock is never
//! held while waiting for a document lock; the engine takes the document
//! first and then the sessions bound to it.

use crate::config::EngineConfig;
use crate::document::{Document, DocumentSnapshot};
use crate::error::{CollabError, CollabResult};
use crate::ids::{DocId, SessionId, UserId};
use crate::merge::{self, Conflict, ConflictResolution, MergeOutcome};
use crate::message::{IncomingMessage, OutgoingMessage};
use crate::offline::{self, SyncReport, UnsyncedOperation};
use crate::operation::{OpData, Operation};
use crate::presence::{Capabilities, User};
use crate::session::{OutboundSender, Session};
use crate::storage::{DocumentStore, MemoryDocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Shared handle to an open document
pub type DocHandle = Arc<Mutex<Document>>;

/// Shared handle to a session
pub type SessionHandle = Arc<Mutex<Session>>;

struct SessionSlot {
    doc_id: DocId,
    handle: SessionHandle,
}

/// Multi-document collaboration engine.
pub struct CollabEngine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    documents: RwLock<HashMap<DocId, DocHandle>>,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    created_at: DateTime<Utc>,
    total_operations: AtomicU64,
    rejected_operations: AtomicU64,
    total_sessions_created: AtomicU64,
    storage_failures: AtomicU64,
}

impl CollabEngine {
    /// Create an engine over a document store.
    pub fn new(config: EngineConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            store,
            documents: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            created_at: Utc::now(),
            total_operations: AtomicU64::new(0),
            rejected_operations: AtomicU64::new(0),
            total_sessions_created: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
        }
    }

    /// Default configuration over an in-memory store.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), Arc::new(MemoryDocumentStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ========== Sessions ==========

    /// Open a session on `doc_id`, loading the document or creating it empty.
    pub async fn create_session(&self, doc_id: impl Into<DocId>) -> CollabResult<SessionId> {
        let doc_id = doc_id.into();
        self.document_handle(&doc_id, true).await?;

        let session_id = SessionId::generate();
        let session = Session::new(session_id.clone(), doc_id.clone(), &self.config);
        self.sessions.write().await.insert(
            session_id.clone(),
            SessionSlot {
                doc_id: doc_id.clone(),
                handle: Arc::new(Mutex::new(session)),
            },
        );
        self.total_sessions_created.fetch_add(1, Ordering::SeqCst);

        tracing::info!(session_id = %session_id, doc_id = %doc_id, "Session created");
        Ok(session_id)
    }

    /// Add a user to a session.
    ///
    /// Returns `Ok(false)` if the user was already a member. `sender` receives
    /// the member's broadcasts.
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
        capabilities: Capabilities,
        sender: Option<OutboundSender>,
    ) -> CollabResult<bool> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        session.join(user_id.into(), display_name, capabilities, sender, Utc::now())
    }

    /// Remove a user from a session.
    ///
    /// With `release_locks_on_leave`, the user's region locks are released
    /// through Unlock operations. The session is destroyed once empty.
    pub async fn leave_session(&self, session_id: &SessionId, user_id: &UserId) -> CollabResult<bool> {
        let (handle, doc_id) = self.session_slot(session_id).await?;
        let now_empty = {
            let mut session = handle.lock().await;
            if !session.leave(user_id) {
                return Ok(false);
            }
            session.is_empty()
        };

        if self.config.session.release_locks_on_leave {
            self.release_user_locks(session_id, &doc_id, user_id).await?;
        }

        if now_empty {
            self.sessions.write().await.remove(session_id);
            tracing::info!(session_id = %session_id, doc_id = %doc_id, "Session destroyed");
        }
        Ok(true)
    }

    /// Remove members idle at `now`, as if each had left.
    ///
    /// Locks are released per `release_locks_on_leave` and an emptied session
    /// is destroyed. Returns the removed members.
    pub async fn cleanup_idle_users(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> CollabResult<Vec<UserId>> {
        let (handle, doc_id) = self.session_slot(session_id).await?;
        let (removed, now_empty) = {
            let mut session = handle.lock().await;
            let removed = session.cleanup_idle(now);
            (removed, session.is_empty())
        };
        if removed.is_empty() {
            return Ok(removed);
        }

        if self.config.session.release_locks_on_leave {
            for user_id in &removed {
                self.release_user_locks(session_id, &doc_id, user_id).await?;
            }
        }

        if now_empty {
            self.sessions.write().await.remove(session_id);
            tracing::info!(session_id = %session_id, doc_id = %doc_id, "Session destroyed");
        }
        Ok(removed)
    }

    async fn release_user_locks(
        &self,
        session_id: &SessionId,
        doc_id: &DocId,
        user_id: &UserId,
    ) -> CollabResult<()> {
        let mut document = self.lock_document(doc_id, true).await?;
        let regions = document.locks().regions_held_by(user_id);
        if regions.is_empty() {
            return Ok(());
        }

        let mut released = Vec::with_capacity(regions.len());
        for region in regions {
            let unlock = Operation::unlock(user_id.clone(), document.version(), region);
            released.push(document.apply_operation(&unlock)?);
        }
        self.persist(&document);
        let version = document.version();

        for applied in &released {
            self.fan_out(Some(session_id), doc_id, applied, version).await;
        }
        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            count = released.len(),
            "Released locks of departing user"
        );
        Ok(())
    }

    /// Members seen within the liveness window.
    pub async fn active_users(&self, session_id: &SessionId) -> CollabResult<Vec<User>> {
        let handle = self.session_handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.active_users(Utc::now()))
    }

    /// Members outside the liveness window.
    pub async fn idle_users(&self, session_id: &SessionId) -> CollabResult<Vec<User>> {
        let handle = self.session_handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.idle_users(Utc::now()))
    }

    /// One member's presence state.
    pub async fn session_user(&self, session_id: &SessionId, user_id: &UserId) -> CollabResult<User> {
        let handle = self.session_handle(session_id).await?;
        let session = handle.lock().await;
        session.require_member(user_id).cloned()
    }

    /// Document a session is bound to.
    pub async fn session_document(&self, session_id: &SessionId) -> CollabResult<DocId> {
        self.session_slot(session_id).await.map(|(_, doc_id)| doc_id)
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    // ========== Operations ==========

    /// Apply an operation submitted by a session member.
    ///
    /// The author must be a member; anything but Cursor and Selection also
    /// needs write access. Returns the reconciled operation as applied.
    pub async fn apply_operation(&self, session_id: &SessionId, op: Operation) -> CollabResult<Operation> {
        self.apply_in_session(session_id, op, false).await
    }

    async fn apply_in_session(
        &self,
        session_id: &SessionId,
        op: Operation,
        at_head: bool,
    ) -> CollabResult<Operation> {
        let doc_id = self
            .authorize(session_id, &op.user_id, !op.is_presence())
            .await?;
        let mut document = self.lock_document(&doc_id, true).await?;

        let op = if at_head {
            op.with_base_version(document.version())
        } else {
            op
        };
        let applied = match document.apply_operation(&op) {
            Ok(applied) => applied,
            Err(err) => {
                self.rejected_operations.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    session_id = %session_id,
                    doc_id = %doc_id,
                    user_id = %op.user_id,
                    op_id = %op.id,
                    base_version = op.base_version,
                    error = %err,
                    "Operation rejected"
                );
                return Err(err);
            }
        };

        if applied.is_logged() {
            self.persist(&document);
        }
        let version = document.version();
        self.fan_out(Some(session_id), &doc_id, &applied, version).await;
        drop(document);

        self.total_operations.fetch_add(1, Ordering::SeqCst);
        Ok(applied)
    }

    /// Send an applied operation to every other member of a session.
    ///
    /// Returns the members whose channel was closed.
    pub async fn notify(&self, session_id: &SessionId, operation: &Operation) -> CollabResult<Vec<UserId>> {
        let handle = self.session_handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.broadcast_to_others(
            &operation.user_id,
            OutgoingMessage::Operation {
                session_id: session_id.clone(),
                operation: operation.clone(),
            },
        ))
    }

    /// Deliver an applied operation to every session on the document.
    ///
    /// Called with the document lock held.
    async fn fan_out(
        &self,
        origin: Option<&SessionId>,
        doc_id: &DocId,
        applied: &Operation,
        version: u64,
    ) {
        let now = Utc::now();
        for (session_id, handle) in self.sessions_on(doc_id).await {
            let mut session = handle.lock().await;
            let is_origin = origin == Some(&session_id);

            if is_origin {
                session.touch(&applied.user_id, now);
                // Membership was checked before the apply; a concurrent leave is fine.
                let _ = match &applied.data {
                    OpData::Cursor { position } => {
                        session.update_cursor(&applied.user_id, *position, now)
                    }
                    OpData::Selection { start, end } => {
                        session.update_selection(&applied.user_id, *start, *end, now)
                    }
                    _ => Ok(()),
                };
            }
            session.shift_presence(applied);

            session.broadcast_to_others(
                &applied.user_id,
                OutgoingMessage::Operation {
                    session_id: session_id.clone(),
                    operation: applied.clone(),
                },
            );
            if is_origin && applied.is_logged() {
                session.send_to(
                    &applied.user_id,
                    OutgoingMessage::Ack {
                        op_id: applied.id,
                        version,
                    },
                );
            }
        }
    }

    /// Move a member's caret and broadcast it as a Cursor operation.
    pub async fn update_cursor(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        position: usize,
    ) -> CollabResult<Operation> {
        let (version, len) = self.head_of(session_id).await?;
        let position = position.min(len);

        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        session.update_cursor(user_id, position, Utc::now())?;

        let op = Operation::cursor(user_id.clone(), version, position);
        session.broadcast_to_others(
            user_id,
            OutgoingMessage::Operation {
                session_id: session_id.clone(),
                operation: op.clone(),
            },
        );
        Ok(op)
    }

    /// Set a member's selection and broadcast it as a Selection operation.
    pub async fn update_selection(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        start: usize,
        end: usize,
    ) -> CollabResult<Operation> {
        if start > end {
            return Err(CollabError::InvalidRange { start, end, len: end });
        }
        let (version, len) = self.head_of(session_id).await?;
        let (start, end) = (start.min(len), end.min(len));

        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        session.update_selection(user_id, start, end, Utc::now())?;

        let op = Operation::selection(user_id.clone(), version, start, end);
        session.broadcast_to_others(
            user_id,
            OutgoingMessage::Operation {
                session_id: session_id.clone(),
                operation: op.clone(),
            },
        );
        Ok(op)
    }

    // ========== Locks ==========

    /// Claim a region for a member.
    ///
    /// Fails with [`CollabError::LockConflict`] while another user holds it.
    pub async fn acquire_lock(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        region: &str,
    ) -> CollabResult<Operation> {
        let op = Operation::lock(user_id.clone(), 0, region);
        self.apply_in_session(session_id, op, true).await
    }

    /// Release a region held by a member.
    pub async fn release_lock(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        region: &str,
    ) -> CollabResult<Operation> {
        let op = Operation::unlock(user_id.clone(), 0, region);
        self.apply_in_session(session_id, op, true).await
    }

    /// Release every lock whose lease ran out at `now`, across open documents.
    ///
    /// Members are told through Unlock operations in the former holder's name.
    pub async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Vec<(DocId, String, UserId)> {
        let handles: Vec<(DocId, DocHandle)> = self
            .documents
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut swept = Vec::new();
        for (doc_id, handle) in handles {
            let mut document = handle.lock().await;
            if document.is_closed() {
                continue;
            }
            let released = document.release_expired_locks(now);
            if released.is_empty() {
                continue;
            }
            self.persist(&document);
            let version = document.version();
            for (region, holder) in released {
                let unlock = Operation::unlock(holder.clone(), version, region.clone());
                self.fan_out(None, &doc_id, &unlock, version).await;
                swept.push((doc_id.clone(), region, holder));
            }
        }
        swept
    }

    // ========== Offline sync & merge ==========

    /// Replay operations a member buffered while disconnected.
    ///
    /// Operations by other authors are refused. Applied operations are
    /// broadcast like live edits.
    pub async fn sync_offline(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        operations: Vec<Operation>,
    ) -> CollabResult<SyncReport> {
        let doc_id = self.authorize(session_id, user_id, true).await?;

        let (own, foreign): (Vec<Operation>, Vec<Operation>) = operations
            .into_iter()
            .partition(|op| op.user_id == *user_id);

        let mut document = self.lock_document(&doc_id, true).await?;
        let mut report = offline::replay_offline(&mut document, own);
        report.unsynced.extend(foreign.into_iter().map(|operation| UnsyncedOperation {
            error: CollabError::PermissionDenied {
                user_id: user_id.clone(),
                reason: format!("operation {} belongs to {}", operation.id, operation.user_id),
            },
            operation,
        }));

        if !report.applied.is_empty() {
            self.persist(&document);
        }
        for applied in &report.applied {
            self.fan_out(Some(session_id), &doc_id, applied, report.version).await;
        }
        drop(document);

        self.total_operations
            .fetch_add(report.applied.len() as u64, Ordering::SeqCst);
        self.rejected_operations
            .fetch_add(report.unsynced.len() as u64, Ordering::SeqCst);
        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            applied = report.applied.len(),
            unsynced = report.unsynced.len(),
            version = report.version,
            "Offline sync finished"
        );
        Ok(report)
    }

    /// Merge a batch authored on `base_version`, holding back conflicts.
    ///
    /// Every author in the batch must be a member with write access.
    pub async fn merge_conflicts(
        &self,
        session_id: &SessionId,
        base_version: u64,
        incoming: Vec<Operation>,
    ) -> CollabResult<MergeOutcome> {
        let doc_id = self.session_document(session_id).await?;
        for op in &incoming {
            self.authorize(session_id, &op.user_id, true).await?;
        }

        let mut document = self.lock_document(&doc_id, true).await?;
        let outcome = merge::merge_into(&mut document, base_version, incoming)?;

        if !outcome.merged.is_empty() {
            self.persist(&document);
        }
        let version = document.version();
        for applied in &outcome.merged {
            self.fan_out(Some(session_id), &doc_id, applied, version).await;
        }
        drop(document);

        self.total_operations
            .fetch_add(outcome.merged.len() as u64, Ordering::SeqCst);
        if !outcome.is_clean() {
            tracing::warn!(
                session_id = %session_id,
                doc_id = %doc_id,
                conflicts = outcome.conflicts.len(),
                rejected = outcome.rejected.len(),
                "Merge left operations unapplied"
            );
        }
        Ok(outcome)
    }

    /// Settle a conflict reported by [`merge_conflicts`](Self::merge_conflicts).
    pub async fn resolve_conflict(
        &self,
        session_id: &SessionId,
        conflict: &Conflict,
        resolution: ConflictResolution,
    ) -> CollabResult<Option<Operation>> {
        let doc_id = self
            .authorize(session_id, &conflict.incoming.user_id, true)
            .await?;
        if let ConflictResolution::Merge(replacement) = &resolution {
            self.authorize(session_id, &replacement.user_id, true).await?;
        }

        let mut document = self.lock_document(&doc_id, true).await?;
        let applied = merge::resolve(&mut document, conflict, resolution)?;

        if let Some(applied) = &applied {
            self.persist(&document);
            let version = document.version();
            self.fan_out(Some(session_id), &doc_id, applied, version).await;
            self.total_operations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(applied)
    }

    // ========== Transport ==========

    /// Decode and dispatch one inbound JSON message.
    pub async fn handle_message(&self, bytes: &[u8]) -> CollabResult<Operation> {
        let message: IncomingMessage = serde_json::from_slice(bytes)?;
        tracing::debug!(session_id = %message.session_id(), "Handling inbound message");

        match message {
            IncomingMessage::Operation {
                session_id,
                operation,
            } => self.apply_operation(&session_id, operation).await,
            IncomingMessage::Cursor {
                session_id,
                user_id,
                position,
            } => self.update_cursor(&session_id, &user_id, position).await,
            IncomingMessage::Selection {
                session_id,
                user_id,
                start,
                end,
            } => {
                self.update_selection(&session_id, &user_id, start, end)
                    .await
            }
        }
    }

    // ========== Documents ==========

    /// Current content of a document.
    pub async fn document_content(&self, doc_id: &DocId) -> CollabResult<String> {
        let document = self.lock_document(doc_id, false).await?;
        Ok(document.content().to_string())
    }

    /// Current version of a document.
    pub async fn document_version(&self, doc_id: &DocId) -> CollabResult<u64> {
        let document = self.lock_document(doc_id, false).await?;
        Ok(document.version())
    }

    /// Point-in-time snapshot of a document.
    pub async fn document_snapshot(&self, doc_id: &DocId) -> CollabResult<DocumentSnapshot> {
        let document = self.lock_document(doc_id, false).await?;
        Ok(document.snapshot())
    }

    /// Handle to an open document, for callers that need the full read API.
    ///
    /// The handle goes stale once the document is unloaded: it reports
    /// [`Document::is_closed`] and refuses operations.
    pub async fn document(&self, doc_id: &DocId) -> CollabResult<DocHandle> {
        self.document_handle(doc_id, false).await
    }

    /// Save and drop a document from the arena.
    ///
    /// Sessions still bound to it reload it from storage on next use; a
    /// request already waiting on the old instance retries against the
    /// reloaded one. Returns `false` if it was not loaded. On a storage error
    /// the document stays loaded.
    pub async fn unload_document(&self, doc_id: &DocId) -> CollabResult<bool> {
        // Hold the arena until the instance is closed so nobody reloads a
        // snapshot older than the one being written here.
        let mut documents = self.documents.write().await;
        let Some(handle) = documents.get(doc_id).cloned() else {
            return Ok(false);
        };
        let mut document = handle.lock().await;
        self.store.save_document(&document.snapshot())?;
        document.close();
        documents.remove(doc_id);

        tracing::info!(doc_id = %doc_id, version = document.version(), "Document unloaded");
        Ok(true)
    }

    /// Whether a document is in the arena.
    pub async fn is_loaded(&self, doc_id: &DocId) -> bool {
        self.documents.read().await.contains_key(doc_id)
    }

    /// Get engine statistics.
    pub async fn stats(&self) -> EngineStats {
        let document_count = self.documents.read().await.len();
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .await
            .values()
            .map(|slot| slot.handle.clone())
            .collect();

        let mut total_users = 0;
        for handle in &handles {
            total_users += handle.lock().await.user_count();
        }

        EngineStats {
            document_count,
            session_count: handles.len(),
            total_users,
            total_operations: self.total_operations.load(Ordering::SeqCst),
            rejected_operations: self.rejected_operations.load(Ordering::SeqCst),
            total_sessions_created: self.total_sessions_created.load(Ordering::SeqCst),
            storage_failures: self.storage_failures.load(Ordering::SeqCst),
            created_at: self.created_at,
        }
    }

    // ========== Internals ==========

    async fn session_slot(&self, session_id: &SessionId) -> CollabResult<(SessionHandle, DocId)> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|slot| (slot.handle.clone(), slot.doc_id.clone()))
            .ok_or_else(|| CollabError::UnknownSession(session_id.clone()))
    }

    async fn session_handle(&self, session_id: &SessionId) -> CollabResult<SessionHandle> {
        self.session_slot(session_id).await.map(|(handle, _)| handle)
    }

    async fn sessions_on(&self, doc_id: &DocId) -> Vec<(SessionId, SessionHandle)> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.doc_id == *doc_id)
            .map(|(id, slot)| (id.clone(), slot.handle.clone()))
            .collect()
    }

    /// Check membership (and write access if `write`), returning the document id.
    async fn authorize(&self, session_id: &SessionId, user_id: &UserId, write: bool) -> CollabResult<DocId> {
        let (handle, doc_id) = self.session_slot(session_id).await?;
        let session = handle.lock().await;
        if write {
            session.require_writer(user_id)?;
        } else {
            session.require_member(user_id)?;
        }
        Ok(doc_id)
    }

    /// Version and length of the session's document.
    async fn head_of(&self, session_id: &SessionId) -> CollabResult<(u64, usize)> {
        let doc_id = self.session_document(session_id).await?;
        let document = self.lock_document(&doc_id, true).await?;
        Ok((document.version(), document.len()))
    }

    /// Lock an open document, loading it first if needed.
    ///
    /// An instance closed by [`unload_document`](Self::unload_document)
    /// while this task waited is skipped in favor of a fresh load.
    async fn lock_document(&self, doc_id: &DocId, create: bool) -> CollabResult<OwnedMutexGuard<Document>> {
        loop {
            let handle = self.document_handle(doc_id, create).await?;
            let document = handle.lock_owned().await;
            if !document.is_closed() {
                return Ok(document);
            }
            tracing::debug!(doc_id = %doc_id, "Document unloaded while waiting, reopening");
        }
    }

    /// Open a document from the arena or storage.
    ///
    /// With `create`, a document missing from storage starts empty.
    async fn document_handle(&self, doc_id: &DocId, create: bool) -> CollabResult<DocHandle> {
        if let Some(handle) = self.documents.read().await.get(doc_id) {
            return Ok(handle.clone());
        }

        let document = match self.store.load_document(doc_id)? {
            Some(snapshot) => {
                let document = Document::from_snapshot(snapshot)?;
                tracing::info!(doc_id = %doc_id, version = document.version(), "Loaded document from storage");
                document
            }
            None if create => {
                tracing::info!(doc_id = %doc_id, "Created new document");
                Document::new(doc_id.clone())
            }
            None => return Err(CollabError::UnknownDocument(doc_id.clone())),
        };
        let document = document
            .with_max_log_len(self.config.document.max_log_len)
            .with_lock_lease(self.config.document.lock_lease_ms);

        let mut documents = self.documents.write().await;
        let handle = documents
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(document)));
        Ok(handle.clone())
    }

    /// Save a snapshot. Failures are logged and counted; the in-memory
    /// document stays authoritative.
    fn persist(&self, document: &Document) {
        if let Err(err) = self.store.save_document(&document.snapshot()) {
            self.storage_failures.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                doc_id = %document.id(),
                version = document.version(),
                error = %err,
                "Failed to persist document"
            );
        }
    }
}

/// Statistics about the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Documents in the arena
    pub document_count: usize,
    /// Live sessions
    pub session_count: usize,
    /// Members across all sessions
    pub total_users: usize,
    /// Operations applied
    pub total_operations: u64,
    /// Operations refused
    pub rejected_operations: u64,
    /// Sessions created since start
    pub total_sessions_created: u64,
    /// Snapshot saves that failed
    pub storage_failures: u64,
    pub created_at: DateTime<Utc>,
}
