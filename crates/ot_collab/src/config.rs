//! Engine configuration.
//!
//! Every field has a default, and every section is `#[serde(default)]`, so a
//! config file only needs to name what it overrides:
//!
//! ```json
//! { "presence": { "livenessWindowMs": 10000 }, "document": { "lockLeaseMs": 60000 } }
//! ```

use crate::error::CollabResult;
use crate::presence::default_colors;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for [`CollabEngine`](crate::engine::CollabEngine).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub document: DocumentConfig,
    pub presence: PresenceConfig,
}

/// Per-session limits and lifecycle options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Maximum number of users allowed in one session
    pub max_users: usize,
    /// Drop a user's region locks when they leave
    pub release_locks_on_leave: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_users: 100,
            release_locks_on_leave: true,
        }
    }
}

/// Per-document retention and locking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentConfig {
    /// Log entries retained per document
    pub max_log_len: usize,
    /// Lock lease in milliseconds; `None` means locks never expire
    pub lock_lease_ms: Option<u64>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_log_len: crate::document::DEFAULT_MAX_LOG_LEN,
            lock_lease_ms: None,
        }
    }
}

/// Presence liveness and colors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceConfig {
    /// A user is active if seen within this window (milliseconds)
    pub liveness_window_ms: u64,
    /// Colors assigned round-robin to joining users
    pub colors: Vec<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: 30_000,
            colors: default_colors(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> CollabResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file is
    /// logged and also yields the defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_json_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Failed to parse engine config, using defaults: {}",
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Failed to read engine config, using defaults: {}",
                    e
                );
                Self::default()
            }
        }
    }
}
