//! Wire message types exchanged with the transport layer.
//!
//! The transport hands inbound frames to
//! [`CollabEngine::handle_message`](crate::engine::CollabEngine::handle_message)
//! and drains each member's outbound channel of [`OutgoingMessage`]s. Both
//! are JSON, internally tagged by `type`, with camelCase fields.

use crate::error::CollabError;
use crate::ids::{OpId, SessionId, UserId};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Current wire protocol version
pub const WIRE_VERSION: u32 = 1;

/// Messages sent from a client to the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum IncomingMessage {
    /// Submit an operation of any kind.
    Operation {
        session_id: SessionId,
        operation: Operation,
    },

    /// Caret moved.
    Cursor {
        session_id: SessionId,
        user_id: UserId,
        position: usize,
    },

    /// Selection changed.
    Selection {
        session_id: SessionId,
        user_id: UserId,
        start: usize,
        end: usize,
    },
}

impl IncomingMessage {
    pub fn session_id(&self) -> &SessionId {
        match self {
            IncomingMessage::Operation { session_id, .. }
            | IncomingMessage::Cursor { session_id, .. }
            | IncomingMessage::Selection { session_id, .. } => session_id,
        }
    }
}

/// Messages pushed from the engine to session members.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutgoingMessage {
    /// A reconciled operation from another member.
    Operation {
        session_id: SessionId,
        operation: Operation,
    },

    /// A user joined the session.
    UserJoined {
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        color: String,
    },

    /// A user left the session.
    UserLeft {
        session_id: SessionId,
        user_id: UserId,
    },

    /// An operation from this member was applied.
    Ack { op_id: OpId, version: u64 },

    /// A request from this member failed.
    Error { code: String, message: String },
}

impl OutgoingMessage {
    /// Create an error message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&CollabError> for OutgoingMessage {
    fn from(err: &CollabError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

/// Versioned frame around an encoded message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> WireEnvelope<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    pub fn new(payload: T) -> Self {
        Self {
            version: WIRE_VERSION,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a frame. Newer versions are still attempted.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.version != WIRE_VERSION {
            tracing::debug!(
                version = envelope.version,
                expected = WIRE_VERSION,
                "Decoding frame from a different wire version"
            );
        }
        Ok(envelope)
    }
}
