//! Domain model structs persisted in the document store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use std::collections::{BTreeMap, BTreeSet};

use chatly_shared::constants::{DOCUMENT_PREVIEW, IMAGE_PREVIEW, UNKNOWN_USER_NAME};
use chatly_shared::{
    BlockId, ChatId, FileKind, MessageId, NotificationId, NotificationKind, Presence, RequestId,
    RequestStatus, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.  The primary key is the uid issued by the auth
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Unique, lowercase; used for prefix search.
    pub username: String,
    pub full_name: String,
    pub image: Option<String>,
    pub presence: Presence,
    pub last_seen: Timestamp,
    pub created_at: Timestamp,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
            full_name: self.display_name().to_string(),
            image: self.image.clone(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            UNKNOWN_USER_NAME
        } else {
            &self.full_name
        }
    }
}

/// Denormalized snapshot of a user embedded in other documents.  Taken at
/// write time and never refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub image: Option<String>,
}

// ---------------------------------------------------------------------------
// Friend request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: RequestId,
    pub from: UserId,
    pub to: UserId,
    /// Sender display data captured when the request was sent.
    pub from_name: String,
    pub from_username: String,
    pub from_image: Option<String>,
    pub status: RequestStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub to: UserId,
    pub from: Option<UserId>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    pub timestamp: Timestamp,
    /// Weak back-reference to the friend request that produced it.
    pub request_id: Option<RequestId>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-party conversation with denormalized preview data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub user_ids: [UserId; 2],
    pub users: [UserSummary; 2],
    pub last_message: String,
    pub last_message_timestamp: Timestamp,
    pub created_at: Timestamp,
    /// Cached per-member unread counts.  Derived from the message log and
    /// rewritten whenever it changes; never authoritative.
    pub unread_count: BTreeMap<UserId, u32>,
}

impl Chat {
    pub fn has_member(&self, user: &UserId) -> bool {
        self.user_ids.contains(user)
    }

    /// The other participant, if `user` is a member.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        match &self.user_ids {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn counterpart_summary(&self, user: &UserId) -> Option<&UserSummary> {
        let other = self.counterpart(user)?;
        self.users.iter().find(|u| &u.id == other)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Exactly one of text or file reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    File {
        file_url: String,
        file_type: FileKind,
    },
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// One-line summary stored on the chat as `lastMessage`.
    pub fn preview(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::File {
                file_type: FileKind::Image,
                ..
            } => IMAGE_PREVIEW.to_string(),
            Self::File {
                file_type: FileKind::Document,
                ..
            } => DOCUMENT_PREVIEW.to_string(),
        }
    }
}

/// Delivery state of a stored message from the sender's point of view.
/// A committed message is already visible to the recipient, so it starts
/// out `Delivered`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Receipt {
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: MessagePayload,
    /// Grows monotonically; members are never removed.
    pub read_by: BTreeSet<UserId>,
}

impl Message {
    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        &self.sender_id != viewer && !self.read_by.contains(viewer)
    }

    /// Receipt shown to the sender for a message addressed to `recipient`.
    pub fn receipt_for(&self, recipient: &UserId) -> Receipt {
        if self.read_by.contains(recipient) {
            Receipt::Read
        } else {
            Receipt::Delivered
        }
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Unidirectional block: `blocked_by` no longer accepts `blocked_user`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub blocked_by: UserId,
    pub blocked_user: UserId,
    pub timestamp: Timestamp,
}
