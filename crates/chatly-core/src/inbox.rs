//! Everything a signed-in user watches at once.

use chatly_shared::UserId;
use chatly_store::{Chat, FriendRequest, Notification};

use crate::sync::{Disposers, Subscription};
use crate::unread::{UnreadCounts, UnreadTracker};

/// Live views for one user: chat list, unread badges, notifications and
/// pending friend requests.  All of them stop together on [`close`] or on
/// drop.
///
/// [`close`]: Inbox::close
pub struct Inbox {
    user: UserId,
    pub chats: Subscription<Chat>,
    pub notifications: Subscription<Notification>,
    pub requests: Subscription<FriendRequest>,
    unread: UnreadTracker,
    disposers: Disposers,
}

impl Inbox {
    pub(crate) fn new(
        user: UserId,
        chats: Subscription<Chat>,
        notifications: Subscription<Notification>,
        requests: Subscription<FriendRequest>,
        unread: UnreadTracker,
    ) -> Self {
        let mut disposers = Disposers::new();
        disposers.push(chats.disposer());
        disposers.push(notifications.disposer());
        disposers.push(requests.disposer());
        disposers.push(unread.disposer());
        Self {
            user,
            chats,
            notifications,
            requests,
            unread,
            disposers,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn unread_counts(&self) -> UnreadCounts {
        self.unread.current()
    }

    pub fn is_open(&self) -> bool {
        !self.disposers.is_empty()
    }

    /// Dispose every subscription.  Snapshots already in flight are
    /// dropped.
    pub fn close(&mut self) {
        tracing::debug!(user = %self.user, subscriptions = self.disposers.len(), "closing inbox");
        self.disposers.dispose_all();
    }
}
