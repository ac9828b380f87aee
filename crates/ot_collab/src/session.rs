//! Editing sessions.
//!
//! A [`Session`] groups the users editing one document. It owns their
//! presence state and their outbound channels; the document itself lives in
//! the engine's arena and is referenced by id only.

use crate::config::EngineConfig;
use crate::error::{CollabError, CollabResult};
use crate::ids::{DocId, SessionId, UserId};
use crate::message::OutgoingMessage;
use crate::operation::Operation;
use crate::presence::{Capabilities, PresenceTracker, User};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Sender half of a member's outbound channel
pub type OutboundSender = mpsc::UnboundedSender<OutgoingMessage>;

/// A set of users editing one document
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    doc_id: DocId,
    presence: PresenceTracker,
    channels: HashMap<UserId, OutboundSender>,
    max_users: usize,
    created_at: DateTime<Utc>,
    active: bool,
}

impl Session {
    pub fn new(id: SessionId, doc_id: DocId, config: &EngineConfig) -> Self {
        Self {
            id,
            doc_id,
            presence: PresenceTracker::new(&config.presence),
            channels: HashMap::new(),
            max_users: config.session.max_users,
            created_at: Utc::now(),
            active: true,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the session still has members. A session that emptied out
    /// stays inactive.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn user(&self, user_id: &UserId) -> Option<&User> {
        self.presence.get_user(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.presence.contains(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.presence.user_count()
    }

    pub fn is_empty(&self) -> bool {
        self.presence.is_empty()
    }

    /// Member ids, ordered
    pub fn member_ids(&self) -> Vec<UserId> {
        self.presence.users().into_iter().map(|u| u.id.clone()).collect()
    }

    /// Add a member.
    ///
    /// Returns `Ok(false)` if the user is already a member. `sender` is the
    /// member's outbound channel; members without one receive no broadcasts.
    pub fn join(
        &mut self,
        user_id: UserId,
        display_name: impl Into<String>,
        capabilities: Capabilities,
        sender: Option<OutboundSender>,
        now: DateTime<Utc>,
    ) -> CollabResult<bool> {
        if !self.active {
            return Err(CollabError::UnknownSession(self.id.clone()));
        }
        if self.presence.contains(&user_id) {
            return Ok(false);
        }
        if self.presence.user_count() >= self.max_users {
            return Err(CollabError::SessionFull(self.max_users));
        }

        self.presence
            .join(user_id.clone(), display_name, capabilities, now);
        if let Some(sender) = sender {
            self.channels.insert(user_id.clone(), sender);
        }

        if let Some(user) = self.presence.get_user(&user_id) {
            let message = OutgoingMessage::UserJoined {
                session_id: self.id.clone(),
                user_id: user.id.clone(),
                display_name: user.display_name.clone(),
                color: user.color.clone(),
            };
            self.broadcast_to_others(&user_id, message);
        }

        tracing::info!(session_id = %self.id, user_id = %user_id, "User joined session");
        Ok(true)
    }

    /// Remove a member. Returns `false` if they were not a member.
    ///
    /// The session becomes inactive once its last member leaves.
    pub fn leave(&mut self, user_id: &UserId) -> bool {
        if self.presence.leave(user_id).is_none() {
            return false;
        }
        self.channels.remove(user_id);

        self.broadcast_to_all(OutgoingMessage::UserLeft {
            session_id: self.id.clone(),
            user_id: user_id.clone(),
        });

        if self.presence.is_empty() {
            self.active = false;
        }
        tracing::info!(session_id = %self.id, user_id = %user_id, "User left session");
        true
    }

    /// Remove every member outside the liveness window, as if each had left.
    pub fn cleanup_idle(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let removed = self.presence.cleanup_idle(now);
        for user_id in &removed {
            self.channels.remove(user_id);
            self.broadcast_to_all(OutgoingMessage::UserLeft {
                session_id: self.id.clone(),
                user_id: user_id.clone(),
            });
            tracing::info!(session_id = %self.id, user_id = %user_id, "Removed idle user from session");
        }

        if !removed.is_empty() && self.presence.is_empty() {
            self.active = false;
        }
        removed
    }

    /// Move a member's caret.
    pub fn update_cursor(
        &mut self,
        user_id: &UserId,
        position: usize,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        if self.presence.update_cursor(user_id, position, now) {
            Ok(())
        } else {
            Err(CollabError::UnknownUser(user_id.clone()))
        }
    }

    /// Set a member's selection.
    pub fn update_selection(
        &mut self,
        user_id: &UserId,
        start: usize,
        end: usize,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        if start > end {
            return Err(CollabError::InvalidRange {
                start,
                end,
                len: end,
            });
        }
        if self.presence.update_selection(user_id, start, end, now) {
            Ok(())
        } else {
            Err(CollabError::UnknownUser(user_id.clone()))
        }
    }

    /// Record activity from a member.
    pub fn touch(&mut self, user_id: &UserId, now: DateTime<Utc>) {
        self.presence.touch(user_id, now);
    }

    /// Members seen within the liveness window
    pub fn active_users(&self, now: DateTime<Utc>) -> Vec<User> {
        self.presence.active_users(now).into_iter().cloned().collect()
    }

    /// Members outside the liveness window
    pub fn idle_users(&self, now: DateTime<Utc>) -> Vec<User> {
        self.presence.idle_users(now).into_iter().cloned().collect()
    }

    /// Move other members' carets through an applied content change.
    pub fn shift_presence(&mut self, applied: &Operation) {
        self.presence.shift_positions(applied);
    }

    /// Check that `user_id` is a member.
    pub fn require_member(&self, user_id: &UserId) -> CollabResult<&User> {
        self.presence
            .get_user(user_id)
            .ok_or_else(|| CollabError::UnknownUser(user_id.clone()))
    }

    /// Check that `user_id` is a member allowed to change content.
    pub fn require_writer(&self, user_id: &UserId) -> CollabResult<()> {
        let user = self.require_member(user_id)?;
        if user.can_write() {
            Ok(())
        } else {
            Err(CollabError::PermissionDenied {
                user_id: user_id.clone(),
                reason: "user has read-only access".to_string(),
            })
        }
    }

    // ========== Broadcasting ==========

    /// Send a message to every member with a channel.
    ///
    /// Returns the members whose channel is closed.
    pub fn broadcast_to_all(&self, message: OutgoingMessage) -> Vec<UserId> {
        self.fan_out(None, message)
    }

    /// Send a message to every member except `exclude`.
    ///
    /// Returns the members whose channel is closed.
    pub fn broadcast_to_others(&self, exclude: &UserId, message: OutgoingMessage) -> Vec<UserId> {
        self.fan_out(Some(exclude), message)
    }

    /// Send a message to one member.
    pub fn send_to(&self, user_id: &UserId, message: OutgoingMessage) -> bool {
        match self.channels.get(user_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    fn fan_out(&self, exclude: Option<&UserId>, message: OutgoingMessage) -> Vec<UserId> {
        let mut failed = Vec::new();
        for (user_id, sender) in &self.channels {
            if Some(user_id) == exclude {
                continue;
            }
            if sender.send(message.clone()).is_err() {
                tracing::warn!(
                    session_id = %self.id,
                    user_id = %user_id,
                    "Outbound channel closed, skipping member"
                );
                failed.push(user_id.clone());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session::new(SessionId::from("s-1"), DocId::from("doc-1"), &EngineConfig::default())
    }

    fn uid(id: &str) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut session = session();
        assert!(session
            .join(uid("alice"), "Alice", Capabilities::editor(), None, t0())
            .unwrap());
        assert!(!session
            .join(uid("alice"), "Alice", Capabilities::editor(), None, t0())
            .unwrap());
        assert_eq!(session.user_count(), 1);
    }

    #[test]
    fn test_session_full() {
        let mut config = EngineConfig::default();
        config.session.max_users = 1;
        let mut session = Session::new(SessionId::from("s-1"), DocId::from("doc-1"), &config);

        session
            .join(uid("alice"), "Alice", Capabilities::editor(), None, t0())
            .unwrap();
        let err = session
            .join(uid("bob"), "Bob", Capabilities::editor(), None, t0())
            .unwrap_err();
        assert_eq!(err, CollabError::SessionFull(1));
    }

    #[test]
    fn test_leave_deactivates_empty_session() {
        let mut session = session();
        session
            .join(uid("alice"), "Alice", Capabilities::editor(), None, t0())
            .unwrap();
        assert!(session.leave(&uid("alice")));
        assert!(!session.leave(&uid("alice")));
        assert!(!session.is_active());

        let err = session
            .join(uid("bob"), "Bob", Capabilities::editor(), None, t0())
            .unwrap_err();
        assert_eq!(err.code(), "unknown_session");
    }

    #[test]
    fn test_join_and_leave_are_broadcast() {
        let mut session = session();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        session
            .join(uid("alice"), "Alice", Capabilities::editor(), Some(alice_tx), t0())
            .unwrap();
        session
            .join(uid("bob"), "Bob", Capabilities::editor(), None, t0())
            .unwrap();

        match alice_rx.try_recv().unwrap() {
            OutgoingMessage::UserJoined { user_id, .. } => assert_eq!(user_id, uid("bob")),
            other => panic!("unexpected message: {other:?}"),
        }

        session.leave(&uid("bob"));
        match alice_rx.try_recv().unwrap() {
            OutgoingMessage::UserLeft { user_id, .. } => assert_eq!(user_id, uid("bob")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_skips_closed_channels() {
        let mut session = session();
        let (alice_tx, alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        session
            .join(uid("alice"), "Alice", Capabilities::editor(), Some(alice_tx), t0())
            .unwrap();
        session
            .join(uid("bob"), "Bob", Capabilities::editor(), Some(bob_tx), t0())
            .unwrap();
        drop(alice_rx);

        let failed = session.broadcast_to_all(OutgoingMessage::error("x", "y"));
        assert_eq!(failed, vec![uid("alice")]);
        assert!(matches!(bob_rx.try_recv(), Ok(OutgoingMessage::Error { .. })));
    }

    #[test]
    fn test_presence_updates() {
        let mut session = session();
        session
            .join(uid("alice"), "Alice", Capabilities::editor(), None, t0())
            .unwrap();
        session
            .join(uid("bob"), "Bob", Capabilities::editor(), None, t0())
            .unwrap();

        let later = t0() + Duration::seconds(20);
        session.update_cursor(&uid("alice"), 4, later).unwrap();
        session.update_selection(&uid("alice"), 1, 4, later).unwrap();
        assert_eq!(session.user(&uid("alice")).unwrap().selection, Some((1, 4)));

        let check = t0() + Duration::seconds(45);
        let active = session.active_users(check);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, uid("alice"));
        assert_eq!(session.idle_users(check)[0].id, uid("bob"));

        assert_eq!(
            session.update_cursor(&uid("ghost"), 1, later).unwrap_err(),
            CollabError::UnknownUser(uid("ghost"))
        );
    }

    #[test]
    fn test_cleanup_idle_drops_members_and_channels() {
        let mut session = session();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, bob_rx) = mpsc::unbounded_channel();
        session
            .join(uid("alice"), "Alice", Capabilities::editor(), Some(alice_tx), t0())
            .unwrap();
        session
            .join(uid("bob"), "Bob", Capabilities::editor(), Some(bob_tx), t0())
            .unwrap();
        assert!(matches!(alice_rx.try_recv(), Ok(OutgoingMessage::UserJoined { .. })));

        session.touch(&uid("alice"), t0() + Duration::seconds(20));
        let removed = session.cleanup_idle(t0() + Duration::seconds(45));
        assert_eq!(removed, vec![uid("bob")]);
        assert!(!session.contains(&uid("bob")));
        assert!(session.is_active());
        match alice_rx.try_recv().unwrap() {
            OutgoingMessage::UserLeft { user_id, .. } => assert_eq!(user_id, uid("bob")),
            other => panic!("unexpected message: {other:?}"),
        }

        // Bob's channel is gone: nothing reaches him any more
        drop(bob_rx);
        assert!(session.broadcast_to_all(OutgoingMessage::error("x", "y")).is_empty());

        assert_eq!(session.cleanup_idle(t0() + Duration::seconds(120)), vec![uid("alice")]);
        assert!(!session.is_active());
        assert!(session.cleanup_idle(t0() + Duration::seconds(500)).is_empty());
    }

    #[test]
    fn test_require_writer() {
        let mut session = session();
        session
            .join(uid("viewer"), "Viewer", Capabilities::viewer(), None, t0())
            .unwrap();
        session
            .join(uid("editor"), "Editor", Capabilities::editor(), None, t0())
            .unwrap();

        assert!(session.require_writer(&uid("editor")).is_ok());
        assert_eq!(
            session.require_writer(&uid("viewer")).unwrap_err().code(),
            "permission_denied"
        );
        assert_eq!(
            session.require_writer(&uid("ghost")).unwrap_err().code(),
            "unknown_user"
        );
    }
}
