//! Shared text document with a versioned, transformable operation log.
//!
//! A [`Document`] owns its content, a version counter, the log of applied
//! operations, region locks, comments and formatting spans. Every mutation
//! goes through [`Document::apply_operation`], which reconciles the incoming
//! operation against everything applied after its base version before
//! touching state.
//!
//! The log is bounded. Entries that fall off the front are folded into a
//! *log base* (content and version at the oldest retained entry), so
//! replaying the base plus the retained log always reproduces the content.

use crate::error::{CollabError, CollabResult};
use crate::ids::{DocId, OpId, UserId};
use crate::lock::LockManager;
use crate::operation::{char_len, OpData, Operation};
use crate::transform::{self, map_position, map_range};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of log entries retained per document.
pub const DEFAULT_MAX_LOG_LEN: usize = 1000;

/// An applied operation together with the version it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOperation {
    /// Document version after this entry was applied
    pub version: u64,
    /// The reconciled operation, in the coordinates it was applied in
    pub operation: Operation,
    /// Content length (chars) after this entry was applied
    pub content_len: usize,
}

/// An inline comment anchored at a content offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: UserId,
    pub position: usize,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A formatting attribute applied over `start..end`.
///
/// Overlapping spans for the same attribute resolve by
/// `(timestamp, author, op_id)`, never by application order, so concurrent
/// format operations commute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatSpan {
    pub start: usize,
    pub end: usize,
    pub attribute: String,
    pub value: serde_json::Value,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
    pub op_id: OpId,
}

impl FormatSpan {
    fn covers(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    fn precedence(&self) -> (DateTime<Utc>, &UserId, OpId) {
        (self.timestamp, &self.author, self.op_id)
    }
}

/// Serializable document state handed to and loaded from storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub id: DocId,
    pub content: String,
    pub version: u64,
    pub base_content: String,
    pub base_version: u64,
    pub log: Vec<LoggedOperation>,
    pub comments: Vec<Comment>,
    pub format_spans: Vec<FormatSpan>,
    pub locks: LockManager,
    pub saved_at: DateTime<Utc>,
}

/// A collaboratively edited text document.
#[derive(Clone, Debug)]
pub struct Document {
    id: DocId,
    content: String,
    content_len: usize,
    version: u64,
    log: VecDeque<LoggedOperation>,
    max_log_len: usize,
    base_content: String,
    base_version: u64,
    comments: Vec<Comment>,
    format_spans: Vec<FormatSpan>,
    locks: LockManager,
    /// Set once the engine has saved and dropped this instance
    closed: bool,
}

impl Document {
    /// Create an empty document at version 0.
    pub fn new(id: impl Into<DocId>) -> Self {
        Self::with_content(id, "")
    }

    /// Create a document whose version-0 content is `content`.
    pub fn with_content(id: impl Into<DocId>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            content_len: char_len(&content),
            base_content: content.clone(),
            content,
            version: 0,
            log: VecDeque::new(),
            max_log_len: DEFAULT_MAX_LOG_LEN,
            base_version: 0,
            comments: Vec::new(),
            format_spans: Vec::new(),
            locks: LockManager::new(),
            closed: false,
        }
    }

    /// Set log retention. Values below 1 are raised to 1.
    pub fn with_max_log_len(mut self, max_log_len: usize) -> Self {
        self.max_log_len = max_log_len.max(1);
        self.trim_log();
        self
    }

    /// Set the lock lease in milliseconds.
    pub fn with_lock_lease(mut self, lease_ms: Option<u64>) -> Self {
        self.locks.set_lease(lease_ms);
        self
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    /// Retire this instance. A closed document refuses every operation;
    /// the up-to-date copy is the one reloaded from storage.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content length in chars.
    pub fn len(&self) -> usize {
        self.content_len
    }

    pub fn is_empty(&self) -> bool {
        self.content_len == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Oldest version an incoming operation may still be based on.
    pub fn oldest_version(&self) -> u64 {
        self.base_version
    }

    pub fn log(&self) -> impl Iterator<Item = &LoggedOperation> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn format_spans(&self) -> &[FormatSpan] {
        &self.format_spans
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Logged operations recorded after `version`, in log order.
    pub fn operations_since(&self, version: u64) -> Vec<&Operation> {
        self.log
            .iter()
            .filter(|entry| entry.version > version)
            .map(|entry| &entry.operation)
            .collect()
    }

    /// Content-mutating operations concurrent with an operation based on `version`.
    pub fn concurrent_with(&self, version: u64) -> Vec<&Operation> {
        self.log
            .iter()
            .filter(|entry| entry.version > version && entry.operation.is_content_mutating())
            .map(|entry| &entry.operation)
            .collect()
    }

    /// Content length at a retained version.
    pub fn content_len_at(&self, version: u64) -> Option<usize> {
        if version < self.base_version || version > self.version {
            return None;
        }
        let len = self
            .log
            .iter()
            .take_while(|entry| entry.version <= version)
            .last()
            .map(|entry| entry.content_len)
            .unwrap_or_else(|| char_len(&self.base_content));
        Some(len)
    }

    /// Effective value of `attribute` at `offset`.
    pub fn format_at(&self, offset: usize, attribute: &str) -> Option<&serde_json::Value> {
        self.format_spans
            .iter()
            .filter(|span| span.attribute == attribute && span.covers(offset))
            .max_by(|a, b| a.precedence().cmp(&b.precedence()))
            .map(|span| &span.value)
    }

    /// Rebuild the content by replaying the retained log over the log base.
    pub fn replay(&self) -> String {
        let mut content = self.base_content.clone();
        for entry in &self.log {
            splice(&mut content, &entry.operation.data);
        }
        content
    }

    /// Check that an operation based on `base_version` can be reconciled.
    pub fn check_base(&self, base_version: u64) -> CollabResult<()> {
        if base_version > self.version {
            return Err(CollabError::InvalidVersion {
                base: base_version,
                current: self.version,
            });
        }
        if base_version < self.base_version {
            return Err(CollabError::StaleBase {
                base: base_version,
                oldest: self.base_version,
            });
        }
        Ok(())
    }

    /// Apply an operation, reconciling it against concurrent history.
    ///
    /// Returns the reconciled operation as applied. On error the document
    /// is unchanged.
    pub fn apply_operation(&mut self, op: &Operation) -> CollabResult<Operation> {
        self.apply_operation_at(op, Utc::now())
    }

    /// [`apply_operation`](Self::apply_operation) with an explicit clock for
    /// lock leases.
    pub fn apply_operation_at(
        &mut self,
        op: &Operation,
        now: DateTime<Utc>,
    ) -> CollabResult<Operation> {
        if self.closed {
            return Err(CollabError::UnknownDocument(self.id.clone()));
        }
        self.check_base(op.base_version)?;
        self.validate(op)?;

        let reconciled = {
            let concurrent = self.concurrent_with(op.base_version);
            transform::rebase_all(op, concurrent).map_err(|gap| {
                tracing::warn!(
                    doc_id = %self.id,
                    op_id = %op.id,
                    user_id = %op.user_id,
                    %gap,
                    "Operation has no transform rule against concurrent history"
                );
                CollabError::from(gap)
            })?
        };

        let mut reconciled = self.clamp(reconciled);
        reconciled.base_version = self.version;

        self.mutate(&reconciled, now)?;

        if reconciled.is_content_mutating() {
            self.version += 1;
        }
        if reconciled.is_logged() {
            self.log.push_back(LoggedOperation {
                version: self.version,
                operation: reconciled.clone(),
                content_len: self.content_len,
            });
            self.trim_log();
        }

        tracing::debug!(
            doc_id = %self.id,
            op_id = %reconciled.id,
            kind = %reconciled.kind(),
            version = self.version,
            "Applied operation"
        );

        Ok(reconciled)
    }

    /// Drop locks whose lease ran out at `now`, returning region and former holder.
    ///
    /// Lock state is not part of content replay, so nothing is logged.
    pub fn release_expired_locks(&mut self, now: DateTime<Utc>) -> Vec<(String, UserId)> {
        let released = self.locks.release_expired(now);
        for (region, holder) in &released {
            tracing::info!(doc_id = %self.id, region, holder = %holder, "Released expired region lock");
        }
        released
    }

    /// Take a storage snapshot.
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id.clone(),
            content: self.content.clone(),
            version: self.version,
            base_content: self.base_content.clone(),
            base_version: self.base_version,
            log: self.log.iter().cloned().collect(),
            comments: self.comments.clone(),
            format_spans: self.format_spans.clone(),
            locks: self.locks.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Restore a document from a snapshot, verifying replay determinism.
    pub fn from_snapshot(snapshot: DocumentSnapshot) -> CollabResult<Self> {
        let document = Self {
            id: snapshot.id,
            content_len: char_len(&snapshot.content),
            content: snapshot.content,
            version: snapshot.version,
            log: snapshot.log.into_iter().collect(),
            max_log_len: DEFAULT_MAX_LOG_LEN,
            base_content: snapshot.base_content,
            base_version: snapshot.base_version,
            comments: snapshot.comments,
            format_spans: snapshot.format_spans,
            locks: snapshot.locks,
            closed: false,
        };

        if document.replay() != document.content {
            return Err(CollabError::InvalidOperation(format!(
                "snapshot for document {} does not replay to its content",
                document.id
            )));
        }
        Ok(document)
    }

    fn validate(&self, op: &Operation) -> CollabResult<()> {
        match &op.data {
            OpData::Lock { region } | OpData::Unlock { region } => {
                if region.is_empty() {
                    return Err(CollabError::InvalidOperation(
                        "lock region must not be empty".to_string(),
                    ));
                }
                return Ok(());
            }
            OpData::Format { attribute, .. } if attribute.is_empty() => {
                return Err(CollabError::InvalidOperation(
                    "format attribute must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        let Some((start, end)) = op.span() else {
            return Ok(());
        };
        if start > end {
            return Err(CollabError::InvalidRange {
                start,
                end,
                len: self.content_len,
            });
        }

        // Ranges must fit the author's view. A point may also fit the current
        // content; it is clamped after rebasing.
        let seen_len = self.content_len_at(op.base_version).unwrap_or(self.content_len);
        let is_point = matches!(
            op.data,
            OpData::Insert { .. } | OpData::Cursor { .. } | OpData::Comment { .. }
        );
        if end > seen_len && !(is_point && end <= self.content_len) {
            return Err(CollabError::InvalidRange {
                start,
                end,
                len: self.content_len,
            });
        }
        Ok(())
    }

    fn clamp(&self, op: Operation) -> Operation {
        let len = self.content_len;
        let data = match &op.data {
            OpData::Insert { position, text } if *position > len => OpData::Insert {
                position: len,
                text: text.clone(),
            },
            OpData::Delete { start, end } if *end > len => OpData::Delete {
                start: (*start).min(len),
                end: len,
            },
            OpData::Format {
                start,
                end,
                attribute,
                value,
            } if *end > len => OpData::Format {
                start: (*start).min(len),
                end: len,
                attribute: attribute.clone(),
                value: value.clone(),
            },
            OpData::Cursor { position } if *position > len => OpData::Cursor { position: len },
            OpData::Selection { start, end } if *end > len => OpData::Selection {
                start: (*start).min(len),
                end: len,
            },
            OpData::Comment {
                comment_id,
                position,
                text,
            } if *position > len => OpData::Comment {
                comment_id: comment_id.clone(),
                position: len,
                text: text.clone(),
            },
            _ => return op,
        };
        tracing::debug!(doc_id = %self.id, op_id = %op.id, "Clamped reconciled operation to content bounds");
        op.with_data(data)
    }

    fn mutate(&mut self, op: &Operation, now: DateTime<Utc>) -> CollabResult<()> {
        match &op.data {
            OpData::Insert { .. } | OpData::Delete { .. } => {
                splice(&mut self.content, &op.data);
                self.content_len = (self.content_len as isize + op.length_delta()) as usize;
                self.shift_anchors(op);
            }
            OpData::Format {
                start,
                end,
                attribute,
                value,
            } => {
                if start < end {
                    self.format_spans.push(FormatSpan {
                        start: *start,
                        end: *end,
                        attribute: attribute.clone(),
                        value: value.clone(),
                        author: op.user_id.clone(),
                        timestamp: op.timestamp,
                        op_id: op.id,
                    });
                }
            }
            OpData::Comment {
                comment_id,
                position,
                text,
            } => {
                self.comments.push(Comment {
                    id: comment_id.clone(),
                    author: op.user_id.clone(),
                    position: *position,
                    text: text.clone(),
                    timestamp: op.timestamp,
                });
            }
            OpData::Lock { region } => {
                if !self.locks.acquire_at(region, &op.user_id, now) {
                    return Err(CollabError::LockConflict {
                        region: region.clone(),
                        holder: self.locks.holder(region).cloned(),
                    });
                }
            }
            OpData::Unlock { region } => {
                if !self.locks.release(region, &op.user_id) {
                    return Err(CollabError::LockConflict {
                        region: region.clone(),
                        holder: self.locks.holder(region).cloned(),
                    });
                }
            }
            OpData::Cursor { .. } | OpData::Selection { .. } => {}
        }
        Ok(())
    }

    /// Move comments and format spans through a content change.
    fn shift_anchors(&mut self, op: &Operation) {
        for comment in &mut self.comments {
            comment.position = map_position(comment.position, op);
        }
        for span in &mut self.format_spans {
            let (start, end) = map_range(span.start, span.end, op);
            span.start = start;
            span.end = end;
        }
        self.format_spans.retain(|span| span.start < span.end);
    }

    fn trim_log(&mut self) {
        while self.log.len() > self.max_log_len {
            if let Some(evicted) = self.log.pop_front() {
                splice(&mut self.base_content, &evicted.operation.data);
                self.base_version = evicted.version;
            }
        }
    }
}

/// Apply the content effect of a payload.
fn splice(content: &mut String, data: &OpData) {
    match data {
        OpData::Insert { position, text } => {
            let at = byte_index(content, *position);
            content.insert_str(at, text);
        }
        OpData::Delete { start, end } if start < end => {
            let from = byte_index(content, *start);
            let to = byte_index(content, *end);
            content.replace_range(from..to, "");
        }
        _ => {}
    }
}

/// Byte offset of the `char_index`-th char, or the end of the string.
fn byte_index(content: &str, char_index: usize) -> usize {
    content
        .char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(content.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_new_document() {
        let doc = Document::new("doc-1");
        assert_eq!(doc.content(), "");
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.log_len(), 0);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_sequential_inserts() {
        let mut doc = Document::new("doc-1");
        doc.apply_operation(&Operation::insert("alice", 0, 0, "Hello")).unwrap();
        doc.apply_operation(&Operation::insert("alice", 1, 5, " World")).unwrap();
        assert_eq!(doc.content(), "Hello World");
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_concurrent_insert_example() {
        let mut doc = Document::new("doc-1");
        doc.apply_operation(&Operation::insert("user1", 0, 0, "Hello ")).unwrap();
        assert_eq!(doc.version(), 1);

        let applied = doc
            .apply_operation(&Operation::insert("user2", 0, 6, "World!"))
            .unwrap();
        assert_eq!(doc.content(), "Hello World!");
        assert_eq!(doc.version(), 2);
        assert_eq!(applied.base_version, 1);
    }

    #[test]
    fn test_overlapping_delete_example() {
        let mut doc = Document::with_content("doc-1", "Hello Beautiful World");
        doc.apply_operation(&Operation::delete("user1", 0, 6, 16)).unwrap();
        assert_eq!(doc.content(), "Hello World");

        doc.apply_operation(&Operation::delete("user2", 0, 0, 5)).unwrap();
        assert_eq!(doc.content(), " World");
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_contained_delete_becomes_noop() {
        let mut doc = Document::with_content("doc-1", "0123456789");
        doc.apply_operation(&Operation::delete("a", 0, 2, 8)).unwrap();
        let applied = doc.apply_operation(&Operation::delete("b", 0, 3, 5)).unwrap();

        assert!(applied.is_noop());
        assert_eq!(doc.content(), "0189");
        // A no-op delete still consumed a version
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_out_of_range_rejected_atomically() {
        let mut doc = Document::with_content("doc-1", "abc");
        let err = doc
            .apply_operation(&Operation::insert("a", 0, 10, "x"))
            .unwrap_err();
        assert!(matches!(err, CollabError::InvalidRange { len: 3, .. }));

        let err = doc.apply_operation(&Operation::delete("a", 0, 1, 9)).unwrap_err();
        assert!(matches!(err, CollabError::InvalidRange { .. }));

        let err = doc.apply_operation(&Operation::delete("a", 0, 2, 1)).unwrap_err();
        assert!(matches!(err, CollabError::InvalidRange { .. }));

        assert_eq!(doc.content(), "abc");
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.log_len(), 0);
    }

    #[test]
    fn test_range_checked_against_author_view() {
        let mut doc = Document::with_content("doc-1", "abc");
        doc.apply_operation(&Operation::insert("bob", 0, 0, "XYZW")).unwrap();

        // Fits today's seven characters but not the three alice saw
        let err = doc.apply_operation(&Operation::delete("alice", 0, 2, 5)).unwrap_err();
        assert!(matches!(err, CollabError::InvalidRange { start: 2, end: 5, .. }));
        let err = doc
            .apply_operation(&Operation::format("alice", 0, 1, 6, "bold", serde_json::json!(true)))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_range");

        assert_eq!(doc.content(), "XYZWabc");
        assert_eq!(doc.version(), 1);

        // A point past the author's view may still land in current content
        doc.apply_operation(&Operation::insert("alice", 0, 5, "!")).unwrap();
        assert_eq!(doc.content(), "XYZWabc!");
    }

    #[test]
    fn test_version_bounds() {
        let mut doc = Document::new("doc-1");
        let err = doc
            .apply_operation(&Operation::insert("a", 3, 0, "x"))
            .unwrap_err();
        assert_eq!(err, CollabError::InvalidVersion { base: 3, current: 0 });
    }

    #[test]
    fn test_stale_base_after_trim() {
        let mut doc = Document::new("doc-1").with_max_log_len(2);
        for v in 0..4 {
            doc.apply_operation(&Operation::insert("a", v, v as usize, "x")).unwrap();
        }
        assert_eq!(doc.oldest_version(), 2);
        let err = doc
            .apply_operation(&Operation::insert("b", 1, 0, "y"))
            .unwrap_err();
        assert_eq!(err, CollabError::StaleBase { base: 1, oldest: 2 });
    }

    #[test]
    fn test_replay_reproduces_content() {
        let mut doc = Document::with_content("doc-1", "seed");
        doc.apply_operation(&Operation::insert("a", 0, 4, " text")).unwrap();
        doc.apply_operation(&Operation::delete("b", 0, 0, 2)).unwrap();
        doc.apply_operation(&Operation::comment("c", 2, 1, "hmm")).unwrap();
        doc.apply_operation(&Operation::insert("c", 2, 0, "[")).unwrap();
        assert_eq!(doc.replay(), doc.content());
    }

    #[test]
    fn test_replay_after_log_trim() {
        let mut doc = Document::new("doc-1").with_max_log_len(3);
        for (v, word) in ["alpha ", "beta ", "gamma ", "delta ", "eps"].iter().enumerate() {
            let at = doc.len();
            doc.apply_operation(&Operation::insert("a", v as u64, at, *word)).unwrap();
        }
        assert_eq!(doc.log_len(), 3);
        assert_eq!(doc.replay(), "alpha beta gamma delta eps");
        assert_eq!(doc.replay(), doc.content());
    }

    #[test]
    fn test_non_content_ops_keep_version() {
        let mut doc = Document::with_content("doc-1", "abc");

        doc.apply_operation(&Operation::cursor("a", 0, 1)).unwrap();
        doc.apply_operation(&Operation::selection("a", 0, 0, 2)).unwrap();
        doc.apply_operation(&Operation::comment("a", 0, 1, "note")).unwrap();
        doc.apply_operation(&Operation::lock("a", 0, "intro")).unwrap();
        doc.apply_operation(&Operation::unlock("a", 0, "intro")).unwrap();

        assert_eq!(doc.version(), 0);
        // Presence is not logged; comment and lock/unlock are
        let kinds: Vec<OpKind> = doc.log().map(|e| e.operation.kind()).collect();
        assert_eq!(kinds, vec![OpKind::Comment, OpKind::Lock, OpKind::Unlock]);
    }

    #[test]
    fn test_lock_conflict() {
        let mut doc = Document::new("doc-1");
        doc.apply_operation(&Operation::lock("alice", 0, "table")).unwrap();

        let err = doc
            .apply_operation(&Operation::lock("bob", 0, "table"))
            .unwrap_err();
        assert_eq!(
            err,
            CollabError::LockConflict {
                region: "table".into(),
                holder: Some(UserId::from("alice")),
            }
        );

        let err = doc
            .apply_operation(&Operation::unlock("bob", 0, "table"))
            .unwrap_err();
        assert!(matches!(err, CollabError::LockConflict { .. }));

        doc.apply_operation(&Operation::unlock("alice", 0, "table")).unwrap();
        doc.apply_operation(&Operation::lock("bob", 0, "table")).unwrap();
        assert_eq!(doc.locks().holder("table"), Some(&UserId::from("bob")));
    }

    #[test]
    fn test_lock_lease_takeover() {
        let mut doc = Document::new("doc-1").with_lock_lease(Some(1_000));
        doc.apply_operation_at(&Operation::lock("alice", 0, "table"), t0()).unwrap();
        doc.apply_operation_at(&Operation::lock("bob", 0, "table"), t0() + Duration::seconds(2))
            .unwrap();
        assert_eq!(doc.locks().holder("table"), Some(&UserId::from("bob")));
    }

    #[test]
    fn test_release_expired_locks() {
        let mut doc = Document::new("doc-1").with_lock_lease(Some(500));
        doc.apply_operation_at(&Operation::lock("alice", 0, "table"), t0()).unwrap();
        let log_len = doc.log_len();

        assert!(doc.release_expired_locks(t0()).is_empty());
        let released = doc.release_expired_locks(t0() + Duration::seconds(1));
        assert_eq!(released, vec![("table".to_string(), UserId::from("alice"))]);
        assert!(!doc.locks().is_locked("table"));
        assert_eq!(doc.log_len(), log_len);
    }

    #[test]
    fn test_closed_document_refuses_operations() {
        let mut doc = Document::with_content("doc-1", "abc");
        doc.close();
        assert!(doc.is_closed());

        let err = doc.apply_operation(&Operation::insert("a", 0, 0, "x")).unwrap_err();
        assert_eq!(err.code(), "unknown_document");
        assert_eq!(doc.content(), "abc");

        // Reloading yields a live instance
        let reloaded = Document::from_snapshot(doc.snapshot()).unwrap();
        assert!(!reloaded.is_closed());
    }

    #[test]
    fn test_comment_anchor_shifts() {
        let mut doc = Document::with_content("doc-1", "abcdef");
        doc.apply_operation(&Operation::comment("a", 0, 4, "look")).unwrap();
        doc.apply_operation(&Operation::insert("b", 0, 0, "XY")).unwrap();
        assert_eq!(doc.comments()[0].position, 6);

        doc.apply_operation(&Operation::delete("b", 1, 0, 5)).unwrap();
        assert_eq!(doc.comments()[0].position, 1);
    }

    #[test]
    fn test_comment_transformed_against_concurrent_insert() {
        let mut doc = Document::with_content("doc-1", "abcdef");
        doc.apply_operation(&Operation::insert("b", 0, 0, "XY")).unwrap();
        let applied = doc
            .apply_operation(&Operation::comment("a", 0, 4, "look"))
            .unwrap();
        assert_eq!(applied.span(), Some((6, 6)));
        assert_eq!(doc.comments()[0].position, 6);
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn test_format_spans_resolve_by_timestamp() {
        let mut doc = Document::with_content("doc-1", "abcdef");
        let late = Operation::format("a", 0, 0, 4, "color", serde_json::json!("red"))
            .with_timestamp(t0() + Duration::seconds(10));
        let early = Operation::format("b", 0, 2, 6, "color", serde_json::json!("blue"))
            .with_timestamp(t0());

        doc.apply_operation(&late).unwrap();
        doc.apply_operation(&early).unwrap();

        assert_eq!(doc.format_at(1, "color"), Some(&serde_json::json!("red")));
        assert_eq!(doc.format_at(3, "color"), Some(&serde_json::json!("red")));
        assert_eq!(doc.format_at(5, "color"), Some(&serde_json::json!("blue")));
        assert_eq!(doc.format_at(5, "bold"), None);
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.content(), "abcdef");
    }

    #[test]
    fn test_format_span_dropped_when_deleted() {
        let mut doc = Document::with_content("doc-1", "abcdef");
        doc.apply_operation(&Operation::format("a", 0, 2, 4, "bold", serde_json::json!(true)))
            .unwrap();
        doc.apply_operation(&Operation::delete("b", 1, 1, 5)).unwrap();
        assert!(doc.format_spans().is_empty());
    }

    #[test]
    fn test_transform_gap_rejected() {
        let mut doc = Document::with_content("doc-1", "abcdef");
        doc.apply_operation(&Operation::insert("a", 0, 3, "XYZ")).unwrap();

        let err = doc
            .apply_operation(&Operation::delete("b", 0, 1, 5))
            .unwrap_err();
        assert_eq!(err.code(), "transform_gap");
        assert_eq!(doc.content(), "abcXYZdef");
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn test_multibyte_content() {
        let mut doc = Document::with_content("doc-1", "héllo");
        doc.apply_operation(&Operation::insert("a", 0, 2, "ü")).unwrap();
        assert_eq!(doc.content(), "héüllo");
        doc.apply_operation(&Operation::delete("a", 1, 0, 2)).unwrap();
        assert_eq!(doc.content(), "üllo");
        assert_eq!(doc.len(), 4);
    }

    #[test]
    fn test_content_len_at() {
        let mut doc = Document::with_content("doc-1", "ab");
        doc.apply_operation(&Operation::insert("a", 0, 2, "cd")).unwrap();
        doc.apply_operation(&Operation::delete("a", 1, 0, 1)).unwrap();

        assert_eq!(doc.content_len_at(0), Some(2));
        assert_eq!(doc.content_len_at(1), Some(4));
        assert_eq!(doc.content_len_at(2), Some(3));
        assert_eq!(doc.content_len_at(3), None);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut doc = Document::with_content("doc-1", "abc");
        doc.apply_operation(&Operation::insert("a", 0, 3, "def")).unwrap();
        doc.apply_operation(&Operation::lock("a", 1, "intro")).unwrap();

        let restored = Document::from_snapshot(doc.snapshot()).unwrap();
        assert_eq!(restored.content(), "abcdef");
        assert_eq!(restored.version(), 1);
        assert_eq!(restored.log_len(), 2);
        assert!(restored.locks().is_locked("intro"));
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let doc = Document::with_content("doc-1", "abc");
        let mut snapshot = doc.snapshot();
        snapshot.content = "tampered".into();
        assert!(Document::from_snapshot(snapshot).is_err());
    }
}
