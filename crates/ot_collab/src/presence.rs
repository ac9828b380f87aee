//! Presence tracking for session members.
//!
//! Tracks each member's cursor, selection, color and last activity. A member
//! is *active* while their last activity lies within the liveness window;
//! past it they are *idle* but still members until they leave or
//! [`PresenceTracker::cleanup_idle`] drops them.
//!
//! Positions are char offsets into the shared document. After a content
//! change the session calls [`PresenceTracker::shift_positions`] so remote
//! carets follow the text they sit in.

use crate::config::PresenceConfig;
use crate::ids::UserId;
use crate::operation::Operation;
use crate::transform::{map_position, map_range};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a member may do in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
}

impl Capabilities {
    /// Read and write.
    pub fn editor() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    /// Read only.
    pub fn viewer() -> Self {
        Self {
            read: true,
            write: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::editor()
    }
}

/// A session member and their presence state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Assigned color (hex)
    pub color: String,
    /// Caret offset
    pub cursor: usize,
    /// Current selection, if any
    pub selection: Option<(usize, usize)>,
    /// Last activity
    pub last_seen: DateTime<Utc>,
    pub capabilities: Capabilities,
}

impl User {
    /// Whether the user has been seen within `window` of `now`.
    pub fn is_active(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_seen) <= window
    }

    pub fn can_write(&self) -> bool {
        self.capabilities.write
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

/// Remote cursor for rendering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCursor {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
    pub position: usize,
}

/// Remote selection for rendering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSelection {
    pub user_id: UserId,
    pub color: String,
    pub start: usize,
    pub end: usize,
}

/// Presence state of every member of one session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceTracker {
    users: HashMap<UserId, User>,
    /// Kept after a user leaves so a rejoin gets the same color
    color_assignments: HashMap<UserId, String>,
    available_colors: Vec<String>,
    next_color_index: usize,
    liveness_window_ms: u64,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(&PresenceConfig::default())
    }
}

impl PresenceTracker {
    /// Create a tracker from presence configuration
    pub fn new(config: &PresenceConfig) -> Self {
        let mut tracker = Self {
            users: HashMap::new(),
            color_assignments: HashMap::new(),
            available_colors: Vec::new(),
            next_color_index: 0,
            liveness_window_ms: config.liveness_window_ms,
        };
        tracker.set_colors(config.colors.clone());
        tracker
    }

    /// Add a member. Returns `false` if they are already present.
    pub fn join(
        &mut self,
        user_id: UserId,
        display_name: impl Into<String>,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> bool {
        if self.users.contains_key(&user_id) {
            return false;
        }
        let color = self.assign_color(&user_id);
        self.users.insert(
            user_id.clone(),
            User {
                id: user_id,
                display_name: display_name.into(),
                color,
                cursor: 0,
                selection: None,
                last_seen: now,
                capabilities,
            },
        );
        true
    }

    /// Remove a member, returning their final state.
    pub fn leave(&mut self, user_id: &UserId) -> Option<User> {
        self.users.remove(user_id)
    }

    pub fn get_user(&self, user_id: &UserId) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All members, ordered by id
    pub fn users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Color for a user, reusing an earlier assignment
    pub fn assign_color(&mut self, user_id: &UserId) -> String {
        if let Some(color) = self.color_assignments.get(user_id) {
            return color.clone();
        }

        // Palette is never empty, see set_colors
        let index = self.next_color_index % self.available_colors.len();
        let color = self.available_colors[index].clone();
        self.next_color_index = (index + 1) % self.available_colors.len();

        self.color_assignments.insert(user_id.clone(), color.clone());
        color
    }

    /// Replace the palette. An empty palette falls back to the defaults.
    pub fn set_colors(&mut self, colors: Vec<String>) {
        self.available_colors = if colors.is_empty() {
            default_colors()
        } else {
            colors
        };
        self.next_color_index = 0;
    }

    /// Record activity without moving the caret.
    pub fn touch(&mut self, user_id: &UserId, now: DateTime<Utc>) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.touch(now);
                true
            }
            None => false,
        }
    }

    /// Move a member's caret. Returns `false` for unknown members.
    pub fn update_cursor(&mut self, user_id: &UserId, position: usize, now: DateTime<Utc>) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.cursor = position;
                user.touch(now);
                true
            }
            None => false,
        }
    }

    /// Set a member's selection. Returns `false` for unknown members.
    pub fn update_selection(
        &mut self,
        user_id: &UserId,
        start: usize,
        end: usize,
        now: DateTime<Utc>,
    ) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.selection = if start == end { None } else { Some((start, end)) };
                user.cursor = end;
                user.touch(now);
                true
            }
            None => false,
        }
    }

    /// Map every other member's caret and selection through a content change.
    pub fn shift_positions(&mut self, applied: &Operation) {
        if !applied.is_content_mutating() {
            return;
        }
        for user in self.users.values_mut() {
            if user.id == applied.user_id {
                continue;
            }
            user.cursor = map_position(user.cursor, applied);
            user.selection = user
                .selection
                .map(|(start, end)| map_range(start, end, applied))
                .filter(|(start, end)| start < end);
        }
    }

    /// Members seen within the liveness window, ordered by id
    pub fn active_users(&self, now: DateTime<Utc>) -> Vec<&User> {
        let window = self.liveness_window();
        let mut active: Vec<&User> = self
            .users
            .values()
            .filter(|user| user.is_active(now, window))
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Members outside the liveness window, ordered by id
    pub fn idle_users(&self, now: DateTime<Utc>) -> Vec<&User> {
        let window = self.liveness_window();
        let mut idle: Vec<&User> = self
            .users
            .values()
            .filter(|user| !user.is_active(now, window))
            .collect();
        idle.sort_by(|a, b| a.id.cmp(&b.id));
        idle
    }

    /// Drop idle members and return their ids
    pub fn cleanup_idle(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let idle: Vec<UserId> = self.idle_users(now).into_iter().map(|u| u.id.clone()).collect();
        for id in &idle {
            self.users.remove(id);
        }
        idle
    }

    /// Cursors for rendering (excludes specified user)
    pub fn remote_cursors(&self, exclude: &UserId) -> Vec<RemoteCursor> {
        self.users()
            .into_iter()
            .filter(|user| user.id != *exclude)
            .map(|user| RemoteCursor {
                user_id: user.id.clone(),
                display_name: user.display_name.clone(),
                color: user.color.clone(),
                position: user.cursor,
            })
            .collect()
    }

    /// Selections for rendering (excludes specified user)
    pub fn remote_selections(&self, exclude: &UserId) -> Vec<RemoteSelection> {
        self.users()
            .into_iter()
            .filter(|user| user.id != *exclude)
            .filter_map(|user| {
                user.selection.map(|(start, end)| RemoteSelection {
                    user_id: user.id.clone(),
                    color: user.color.clone(),
                    start,
                    end,
                })
            })
            .collect()
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::milliseconds(self.liveness_window_ms as i64)
    }

    pub fn set_liveness_window_ms(&mut self, window_ms: u64) {
        self.liveness_window_ms = window_ms;
    }
}

/// Default color palette for user cursors
pub fn default_colors() -> Vec<String> {
    vec![
        "#E91E63".into(), // Pink
        "#9C27B0".into(), // Purple
        "#3F51B5".into(), // Indigo
        "#2196F3".into(), // Blue
        "#00BCD4".into(), // Cyan
        "#4CAF50".into(), // Green
        "#FF9800".into(), // Orange
        "#795548".into(), // Brown
    ]
}
