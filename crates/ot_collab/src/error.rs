//! Error types for the collaboration core.

use crate::ids::{DocId, SessionId, UserId};
use crate::storage::StorageError;
use crate::transform::TransformGap;
use thiserror::Error;

/// Result type alias for collaboration operations.
pub type CollabResult<T> = Result<T, CollabError>;

/// Errors returned by the engine, documents, sessions and locks.
///
/// None of these cross the session boundary as panics; the transport layer
/// turns them into client-visible messages using [`CollabError::code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// Position or range outside the current content bounds.
    #[error("Range {start}..{end} is out of range for content of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Region held by another user, or release by a non-holder.
    #[error("Lock conflict on region '{region}' (holder: {holder:?})")]
    LockConflict {
        region: String,
        holder: Option<UserId>,
    },

    /// Session does not exist.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// Document does not exist in the arena or in storage.
    #[error("Unknown document: {0}")]
    UnknownDocument(DocId),

    /// User is not a member of the session.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// User lacks the capability required for the operation.
    #[error("Permission denied for user {user_id}: {reason}")]
    PermissionDenied { user_id: UserId, reason: String },

    /// No transform rule exists for the operation pair.
    #[error(transparent)]
    TransformGap(#[from] TransformGap),

    /// Base version is ahead of the document.
    #[error("Base version {base} is ahead of document version {current}")]
    InvalidVersion { base: u64, current: u64 },

    /// Base version predates the retained operation log.
    #[error("Base version {base} predates the oldest retained version {oldest}")]
    StaleBase { base: u64, oldest: u64 },

    /// Session has reached its member limit.
    #[error("Session is full (max: {0})")]
    SessionFull(usize),

    /// Operation is malformed or not valid for the target.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CollabError {
    /// Stable machine-readable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            CollabError::InvalidRange { .. } => "invalid_range",
            CollabError::LockConflict { .. } => "lock_conflict",
            CollabError::UnknownSession(_) => "unknown_session",
            CollabError::UnknownDocument(_) => "unknown_document",
            CollabError::UnknownUser(_) => "unknown_user",
            CollabError::PermissionDenied { .. } => "permission_denied",
            CollabError::TransformGap(_) => "transform_gap",
            CollabError::InvalidVersion { .. } => "invalid_version",
            CollabError::StaleBase { .. } => "stale_base",
            CollabError::SessionFull(_) => "session_full",
            CollabError::InvalidOperation(_) => "invalid_operation",
            CollabError::Storage(_) => "storage",
            CollabError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        CollabError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            CollabError::InvalidRange { start: 0, end: 1, len: 0 },
            CollabError::LockConflict {
                region: "intro".into(),
                holder: None,
            },
            CollabError::UnknownSession(SessionId::from("s")),
            CollabError::UnknownDocument(DocId::from("d")),
            CollabError::SessionFull(2),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_invalid_range_display() {
        let err = CollabError::InvalidRange { start: 3, end: 9, len: 5 };
        assert_eq!(
            err.to_string(),
            "Range 3..9 is out of range for content of length 5"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<u64>("nope").unwrap_err();
        let err: CollabError = json_err.into();
        assert_eq!(err.code(), "serialization");
    }
}
