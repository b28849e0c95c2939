//! Change notifications published after every committed batch.

use chatly_shared::{BlockId, ChatId, MessageId, NotificationId, RequestId, UserId};
use tokio::sync::broadcast;

/// A single document write, tagged with the fields subscribers filter on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    User {
        id: UserId,
    },
    FriendRequest {
        id: RequestId,
        from: UserId,
        to: UserId,
    },
    Notification {
        id: NotificationId,
        to: UserId,
    },
    Chat {
        id: ChatId,
        members: [UserId; 2],
    },
    Message {
        chat_id: ChatId,
        id: MessageId,
    },
    Block {
        id: BlockId,
        blocked_by: UserId,
        blocked_user: UserId,
    },
}

impl Change {
    /// True when the change touches a document `user` can observe directly.
    pub fn involves(&self, user: &UserId) -> bool {
        match self {
            Change::User { id } => id == user,
            Change::FriendRequest { from, to, .. } => from == user || to == user,
            Change::Notification { to, .. } => to == user,
            Change::Chat { members, .. } => members.contains(user),
            Change::Message { .. } => false,
            Change::Block {
                blocked_by,
                blocked_user,
                ..
            } => blocked_by == user || blocked_user == user,
        }
    }
}

/// Fan-out channel for [`Change`]s.
///
/// Uses `tokio::sync::broadcast`; a receiver that falls behind gets
/// `RecvError::Lagged` and is expected to re-read full state.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<Change>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish changes in commit order.  Returns how many receivers were
    /// listening.
    pub fn publish(&self, changes: Vec<Change>) -> usize {
        let mut receivers = 0;
        for change in changes {
            // Err only means nobody is subscribed right now.
            if let Ok(n) = self.sender.send(change) {
                receivers = n;
            }
        }
        receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
