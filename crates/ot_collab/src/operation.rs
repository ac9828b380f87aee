//! Operation types for collaborative editing.
//!
//! An [`Operation`] is an immutable edit or presence event authored by one
//! user against a specific document version. The payload is a tagged sum type
//! ([`OpData`]) so the kind and its data can never disagree, and every
//! consumer (transform, document, merge) matches it exhaustively.
//!
//! Offsets are counted in Unicode scalar values, not bytes.

use crate::ids::{OpId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Discriminant of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Insert,
    Delete,
    Format,
    Cursor,
    Selection,
    Comment,
    Lock,
    Unlock,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Insert => "Insert",
            OpKind::Delete => "Delete",
            OpKind::Format => "Format",
            OpKind::Cursor => "Cursor",
            OpKind::Selection => "Selection",
            OpKind::Comment => "Comment",
            OpKind::Lock => "Lock",
            OpKind::Unlock => "Unlock",
        };
        f.write_str(name)
    }
}

/// Kind-specific payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all_fields = "camelCase")]
pub enum OpData {
    /// Splice `text` in before `position`.
    Insert { position: usize, text: String },

    /// Remove the half-open range `start..end`.
    Delete { start: usize, end: usize },

    /// Set `attribute` to `value` over `start..end`.
    Format {
        start: usize,
        end: usize,
        attribute: String,
        value: serde_json::Value,
    },

    /// Caret moved.
    Cursor { position: usize },

    /// Selection changed.
    Selection { start: usize, end: usize },

    /// Anchor a comment at `position`.
    Comment {
        comment_id: String,
        position: usize,
        text: String,
    },

    /// Claim a named region.
    Lock { region: String },

    /// Give up a named region.
    Unlock { region: String },
}

impl OpData {
    /// The kind tag for this payload.
    pub fn kind(&self) -> OpKind {
        match self {
            OpData::Insert { .. } => OpKind::Insert,
            OpData::Delete { .. } => OpKind::Delete,
            OpData::Format { .. } => OpKind::Format,
            OpData::Cursor { .. } => OpKind::Cursor,
            OpData::Selection { .. } => OpKind::Selection,
            OpData::Comment { .. } => OpKind::Comment,
            OpData::Lock { .. } => OpKind::Lock,
            OpData::Unlock { .. } => OpKind::Unlock,
        }
    }
}

/// A single collaborative operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique identifier, preserved across transformation.
    pub id: OpId,
    /// Author.
    pub user_id: UserId,
    /// Wall-clock creation time; breaks ties between inserts at one position.
    pub timestamp: DateTime<Utc>,
    /// Document version the author computed this operation against.
    pub base_version: u64,
    /// Kind and payload.
    #[serde(flatten)]
    pub data: OpData,
}

impl Operation {
    /// Create an operation stamped with a fresh ID and the current time.
    pub fn new(user_id: impl Into<UserId>, base_version: u64, data: OpData) -> Self {
        Self {
            id: OpId::generate(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            base_version,
            data,
        }
    }

    pub fn insert(
        user_id: impl Into<UserId>,
        base_version: u64,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            base_version,
            OpData::Insert {
                position,
                text: text.into(),
            },
        )
    }

    pub fn delete(user_id: impl Into<UserId>, base_version: u64, start: usize, end: usize) -> Self {
        Self::new(user_id, base_version, OpData::Delete { start, end })
    }

    pub fn format(
        user_id: impl Into<UserId>,
        base_version: u64,
        start: usize,
        end: usize,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::new(
            user_id,
            base_version,
            OpData::Format {
                start,
                end,
                attribute: attribute.into(),
                value,
            },
        )
    }

    pub fn cursor(user_id: impl Into<UserId>, base_version: u64, position: usize) -> Self {
        Self::new(user_id, base_version, OpData::Cursor { position })
    }

    pub fn selection(
        user_id: impl Into<UserId>,
        base_version: u64,
        start: usize,
        end: usize,
    ) -> Self {
        Self::new(user_id, base_version, OpData::Selection { start, end })
    }

    /// Create a comment operation with a freshly generated comment ID.
    pub fn comment(
        user_id: impl Into<UserId>,
        base_version: u64,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            base_version,
            OpData::Comment {
                comment_id: Uuid::new_v4().to_string(),
                position,
                text: text.into(),
            },
        )
    }

    pub fn lock(user_id: impl Into<UserId>, base_version: u64, region: impl Into<String>) -> Self {
        Self::new(
            user_id,
            base_version,
            OpData::Lock {
                region: region.into(),
            },
        )
    }

    pub fn unlock(user_id: impl Into<UserId>, base_version: u64, region: impl Into<String>) -> Self {
        Self::new(
            user_id,
            base_version,
            OpData::Unlock {
                region: region.into(),
            },
        )
    }

    /// Override the timestamp (tests, replays from storage).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the base version.
    pub fn with_base_version(mut self, base_version: u64) -> Self {
        self.base_version = base_version;
        self
    }

    /// A copy of this operation carrying a different payload.
    ///
    /// Used by transformation: identity, author and timestamp are kept.
    pub fn with_data(&self, data: OpData) -> Self {
        Self {
            id: self.id,
            user_id: self.user_id.clone(),
            timestamp: self.timestamp,
            base_version: self.base_version,
            data,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.data.kind()
    }

    /// Whether applying this operation changes content and bumps the version.
    pub fn is_content_mutating(&self) -> bool {
        matches!(
            self.data,
            OpData::Insert { .. } | OpData::Delete { .. } | OpData::Format { .. }
        )
    }

    /// Whether this is an ephemeral presence event.
    pub fn is_presence(&self) -> bool {
        matches!(self.data, OpData::Cursor { .. } | OpData::Selection { .. })
    }

    /// Whether the document records this operation in its log.
    pub fn is_logged(&self) -> bool {
        !self.is_presence()
    }

    /// Whether this operation changes nothing when applied.
    pub fn is_noop(&self) -> bool {
        match &self.data {
            OpData::Insert { text, .. } => text.is_empty(),
            OpData::Delete { start, end } => start >= end,
            _ => false,
        }
    }

    /// The `(start, end)` span this operation addresses, if any.
    ///
    /// Point operations report an empty span.
    pub fn span(&self) -> Option<(usize, usize)> {
        match &self.data {
            OpData::Insert { position, .. } => Some((*position, *position)),
            OpData::Delete { start, end } => Some((*start, *end)),
            OpData::Format { start, end, .. } => Some((*start, *end)),
            OpData::Cursor { position } => Some((*position, *position)),
            OpData::Selection { start, end } => Some((*start, *end)),
            OpData::Comment { position, .. } => Some((*position, *position)),
            OpData::Lock { .. } | OpData::Unlock { .. } => None,
        }
    }

    /// Net change in content length once applied.
    pub fn length_delta(&self) -> isize {
        match &self.data {
            OpData::Insert { text, .. } => char_len(text) as isize,
            OpData::Delete { start, end } => -(end.saturating_sub(*start) as isize),
            _ => 0,
        }
    }
}

/// Length of `text` in Unicode scalar values.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
