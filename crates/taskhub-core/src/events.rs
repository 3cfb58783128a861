//! Notification events and their wire representation.
//!
//! A [`NotificationEvent`] is the immutable unit handed from a use-case (or the
//! due-date scheduler) to the publisher. It is shared as `Arc<NotificationEvent>`
//! once published; nothing downstream mutates it.
//!
//! Clients receive the [`WireNotification`] projection:
//!
//! ```json
//! {"id": "...", "type": "task_due_soon", "title": "...", "message": "...",
//!  "timestamp": "2026-01-01T00:00:00Z", "metadata": {"task_id": "..."}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, TaskId, UserId};

/// Metadata key for the other user in a social notification.
pub const META_FRIEND_ID: &str = "friend_id";
/// Metadata key for the acting user.
pub const META_ACTOR_ID: &str = "actor_id";
/// Metadata key for a task reference.
pub const META_TASK_ID: &str = "task_id";
/// Metadata key for a group reference.
pub const META_GROUP_ID: &str = "group_id";
/// Metadata key for an invitation reference.
pub const META_INVITATION_ID: &str = "invitation_id";
/// Metadata key for a task due date (RFC 3339).
pub const META_DUE_AT: &str = "due_at";

// ─────────────────────────────────────────────────────────────────────────────
// NotificationKind
// ─────────────────────────────────────────────────────────────────────────────

/// Every notification type the system can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Someone sent the target a friend request.
    FriendRequestSent,
    /// The target's friend request was accepted.
    FriendRequestAccepted,
    /// The target's friend request was declined.
    FriendRequestDeclined,
    /// A friend removed the target.
    FriendRemoved,
    /// Another user blocked the target.
    UserBlocked,
    /// The target was invited to a group.
    InvitationCreated,
    /// An invitation sent by the target was accepted.
    InvitationAccepted,
    /// An invitation sent by the target was declined.
    InvitationDeclined,
    /// A task visible to the target was created.
    TaskCreated,
    /// A task visible to the target was updated.
    TaskUpdated,
    /// A task was assigned to the target.
    TaskAssigned,
    /// A task visible to the target was completed.
    TaskCompleted,
    /// A task visible to the target was deleted.
    TaskDeleted,
    /// An assigned task is inside the due-soon window.
    TaskDueSoon,
    /// An assigned task is past its due date.
    TaskOverdue,
}

impl NotificationKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::FriendRequestSent,
        Self::FriendRequestAccepted,
        Self::FriendRequestDeclined,
        Self::FriendRemoved,
        Self::UserBlocked,
        Self::InvitationCreated,
        Self::InvitationAccepted,
        Self::InvitationDeclined,
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskAssigned,
        Self::TaskCompleted,
        Self::TaskDeleted,
        Self::TaskDueSoon,
        Self::TaskOverdue,
    ];

    /// Wire name (`snake_case`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FriendRequestSent => "friend_request_sent",
            Self::FriendRequestAccepted => "friend_request_accepted",
            Self::FriendRequestDeclined => "friend_request_declined",
            Self::FriendRemoved => "friend_removed",
            Self::UserBlocked => "user_blocked",
            Self::InvitationCreated => "invitation_created",
            Self::InvitationAccepted => "invitation_accepted",
            Self::InvitationDeclined => "invitation_declined",
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::TaskDeleted => "task_deleted",
            Self::TaskDueSoon => "task_due_soon",
            Self::TaskOverdue => "task_overdue",
        }
    }

    /// Title shown to the user when the producer does not supply one.
    #[must_use]
    pub fn default_title(self) -> &'static str {
        match self {
            Self::FriendRequestSent => "New friend request",
            Self::FriendRequestAccepted => "Friend request accepted",
            Self::FriendRequestDeclined => "Friend request declined",
            Self::FriendRemoved => "Friend removed",
            Self::UserBlocked => "You were blocked",
            Self::InvitationCreated => "New group invitation",
            Self::InvitationAccepted => "Invitation accepted",
            Self::InvitationDeclined => "Invitation declined",
            Self::TaskCreated => "New task",
            Self::TaskUpdated => "Task updated",
            Self::TaskAssigned => "Task assigned to you",
            Self::TaskCompleted => "Task completed",
            Self::TaskDeleted => "Task deleted",
            Self::TaskDueSoon => "Task due soon",
            Self::TaskOverdue => "Task overdue",
        }
    }

    /// Whether this kind refers to a task.
    #[must_use]
    pub fn is_task(self) -> bool {
        matches!(
            self,
            Self::TaskCreated
                | Self::TaskUpdated
                | Self::TaskAssigned
                | Self::TaskCompleted
                | Self::TaskDeleted
                | Self::TaskDueSoon
                | Self::TaskOverdue
        )
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown notification type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification type: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for NotificationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NotificationEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable delivery unit addressed to one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event identifier (also the persisted notification ID).
    pub id: NotificationId,
    /// Notification type.
    pub kind: NotificationKind,
    /// Target user.
    pub user_id: UserId,
    /// Short title.
    pub title: String,
    /// Human-readable body.
    pub message: String,
    /// Type-specific references (`task_id`, `friend_id`, ...).
    pub metadata: BTreeMap<String, String>,
    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Create an event with the kind's default title and an empty body.
    #[must_use]
    pub fn new(kind: NotificationKind, user_id: UserId) -> Self {
        Self {
            id: NotificationId::new(),
            kind,
            user_id,
            title: kind.default_title().to_owned(),
            message: String::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Replace the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Replace the message body.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the creation timestamp (used by the scheduler's clock).
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Look up a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    // ── Social ──────────────────────────────────────────────────────────

    /// `from` sent `to` a friend request.
    #[must_use]
    pub fn friend_request_sent(to: UserId, from: &UserId, from_name: &str) -> Self {
        Self::new(NotificationKind::FriendRequestSent, to)
            .with_message(format!("{from_name} sent you a friend request"))
            .with_meta(META_FRIEND_ID, from.as_str())
    }

    /// `by` accepted the friend request `to` had sent.
    #[must_use]
    pub fn friend_request_accepted(to: UserId, by: &UserId, by_name: &str) -> Self {
        Self::new(NotificationKind::FriendRequestAccepted, to)
            .with_message(format!("{by_name} accepted your friend request"))
            .with_meta(META_FRIEND_ID, by.as_str())
    }

    /// `by` declined the friend request `to` had sent.
    #[must_use]
    pub fn friend_request_declined(to: UserId, by: &UserId, by_name: &str) -> Self {
        Self::new(NotificationKind::FriendRequestDeclined, to)
            .with_message(format!("{by_name} declined your friend request"))
            .with_meta(META_FRIEND_ID, by.as_str())
    }

    /// `by` removed `to` from their friends.
    #[must_use]
    pub fn friend_removed(to: UserId, by: &UserId, by_name: &str) -> Self {
        Self::new(NotificationKind::FriendRemoved, to)
            .with_message(format!("{by_name} removed you from their friends"))
            .with_meta(META_FRIEND_ID, by.as_str())
    }

    /// `by` blocked `to`.
    #[must_use]
    pub fn user_blocked(to: UserId, by: &UserId) -> Self {
        Self::new(NotificationKind::UserBlocked, to)
            .with_message("A user blocked you")
            .with_meta(META_ACTOR_ID, by.as_str())
    }

    // ── Invitations ─────────────────────────────────────────────────────

    /// `to` was invited into `group_name` by `inviter_name`.
    #[must_use]
    pub fn invitation_created(
        to: UserId,
        invitation_id: &str,
        group_id: &str,
        group_name: &str,
        inviter_name: &str,
    ) -> Self {
        Self::new(NotificationKind::InvitationCreated, to)
            .with_message(format!("{inviter_name} invited you to join {group_name}"))
            .with_meta(META_INVITATION_ID, invitation_id)
            .with_meta(META_GROUP_ID, group_id)
    }

    /// `invitee_name` accepted the invitation `to` sent.
    #[must_use]
    pub fn invitation_accepted(
        to: UserId,
        invitation_id: &str,
        group_id: &str,
        group_name: &str,
        invitee_name: &str,
    ) -> Self {
        Self::new(NotificationKind::InvitationAccepted, to)
            .with_message(format!("{invitee_name} joined {group_name}"))
            .with_meta(META_INVITATION_ID, invitation_id)
            .with_meta(META_GROUP_ID, group_id)
    }

    /// `invitee_name` declined the invitation `to` sent.
    #[must_use]
    pub fn invitation_declined(
        to: UserId,
        invitation_id: &str,
        group_id: &str,
        group_name: &str,
        invitee_name: &str,
    ) -> Self {
        Self::new(NotificationKind::InvitationDeclined, to)
            .with_message(format!("{invitee_name} declined to join {group_name}"))
            .with_meta(META_INVITATION_ID, invitation_id)
            .with_meta(META_GROUP_ID, group_id)
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    /// Task lifecycle notification (`created`, `updated`, `assigned`,
    /// `completed`, `deleted`).
    ///
    /// Due-date kinds go through [`task_due`](Self::task_due).
    #[must_use]
    pub fn task(kind: NotificationKind, to: UserId, task_id: &TaskId, task_title: &str) -> Self {
        debug_assert!(kind.is_task());
        let message = match kind {
            NotificationKind::TaskCreated => format!("\"{task_title}\" was created"),
            NotificationKind::TaskAssigned => format!("You were assigned \"{task_title}\""),
            NotificationKind::TaskCompleted => format!("\"{task_title}\" was completed"),
            NotificationKind::TaskDeleted => format!("\"{task_title}\" was deleted"),
            _ => format!("\"{task_title}\" was updated"),
        };
        Self::new(kind, to)
            .with_message(message)
            .with_meta(META_TASK_ID, task_id.as_str())
    }

    /// Due-date notification (`task_due_soon` or `task_overdue`).
    #[must_use]
    pub fn task_due(
        kind: NotificationKind,
        to: UserId,
        task_id: &TaskId,
        task_title: &str,
        due_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(matches!(
            kind,
            NotificationKind::TaskDueSoon | NotificationKind::TaskOverdue
        ));
        let verb = if kind == NotificationKind::TaskOverdue { "was" } else { "is" };
        Self::new(kind, to)
            .with_message(format!("\"{task_title}\" {verb} due {}", format_due(due_at)))
            .with_meta(META_TASK_ID, task_id.as_str())
            .with_meta(META_DUE_AT, rfc3339(due_at))
    }

    /// Project into the client-facing payload.
    #[must_use]
    pub fn to_wire(&self) -> WireNotification {
        WireNotification {
            id: self.id.to_string(),
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            timestamp: rfc3339(self.created_at),
            metadata: self.metadata.clone(),
        }
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_due(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire payload
// ─────────────────────────────────────────────────────────────────────────────

/// What a client receives for one delivered notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNotification {
    /// Notification ID.
    pub id: String,
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Creation time, RFC 3339 UTC.
    pub timestamp: String,
    /// Type-specific references.
    pub metadata: BTreeMap<String, String>,
}

impl WireNotification {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
