//! Notification feed: per-recipient side-channel events.

use chatly_shared::{NotificationId, NotificationKind, RequestId, UserId};
use chatly_store::{Change, Notification, Store};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::sync::{self, Subscription};

/// Which notifications a mark-read call covers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkRead {
    Ids(Vec<NotificationId>),
    All,
}

pub fn count_unread_notifications(notifications: &[Notification]) -> u32 {
    notifications.iter().filter(|n| !n.read).count() as u32
}

#[derive(Clone)]
pub struct NotificationFeed {
    store: Store,
}

impl NotificationFeed {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert an unread notification for `to`.
    pub async fn push(
        &self,
        to: &UserId,
        from: Option<&UserId>,
        message: &str,
        kind: NotificationKind,
        request_id: Option<RequestId>,
    ) -> Result<Notification> {
        if message.trim().is_empty() {
            return Err(CoreError::InvalidArgument("notification message is empty".into()));
        }
        let (to, from, message) = (to.clone(), from.cloned(), message.to_string());
        let notification = self
            .store
            .write(move |b| -> Result<Notification> {
                let notification = Notification {
                    id: NotificationId::new(),
                    to,
                    from,
                    message,
                    kind,
                    read: false,
                    timestamp: b.now(),
                    request_id,
                };
                b.insert_notification(&notification)?;
                Ok(notification)
            })
            .await?;
        debug!(notification = %notification.id, to = %notification.to, "notification pushed");
        Ok(notification)
    }

    /// Notifications of `user`, newest first.  Degrades to an empty list.
    pub async fn list(&self, user: &UserId) -> Vec<Notification> {
        let user = user.clone();
        let who = user.clone();
        let result: Result<Vec<Notification>> = self
            .store
            .read(move |r| Ok(r.notifications_for(&user)?))
            .await;
        result.unwrap_or_else(|e| {
            warn!(user = %who, error = %e, "listing notifications failed");
            Vec::new()
        })
    }

    /// Unread badge count.  Degrades to zero.
    pub async fn unread_count(&self, user: &UserId) -> u32 {
        count_unread_notifications(&self.list(user).await)
    }

    /// Mark notifications of `user` read.  Ids addressed to anyone else are
    /// ignored.  Returns how many changed.
    pub async fn mark_read(&self, user: &UserId, which: MarkRead) -> Result<usize> {
        let user = user.clone();
        self.store
            .write(move |b| -> Result<usize> {
                let flipped = match which {
                    MarkRead::Ids(ids) => b.mark_notifications_read(&user, &ids)?,
                    MarkRead::All => b.mark_all_notifications_read(&user)?,
                };
                Ok(flipped)
            })
            .await
    }

    pub fn subscribe(&self, user: &UserId) -> Subscription<Notification> {
        let (watch, user) = (user.clone(), user.clone());
        sync::subscribe(
            &self.store,
            "notifications",
            move |c| matches!(c, Change::Notification { to, .. } if to == &watch),
            move |r| Ok(r.notifications_for(&user)?),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::testing::{seeded_store, uid};

    #[tokio::test]
    async fn feed_is_newest_first_with_unread_count() {
        let feed = NotificationFeed::new(seeded_store().await);
        let (a, b) = (uid("u1"), uid("u2"));
        feed.push(&a, Some(&b), "first", NotificationKind::System, None)
            .await
            .unwrap();
        let second = feed
            .push(&a, None, "second", NotificationKind::System, None)
            .await
            .unwrap();

        let list = feed.list(&a).await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id);
        assert_eq!(feed.unread_count(&a).await, 2);
        assert_eq!(feed.unread_count(&b).await, 0);

        assert!(feed
            .push(&a, None, "   ", NotificationKind::System, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn mark_read_is_scoped_to_the_recipient() {
        let feed = NotificationFeed::new(seeded_store().await);
        let (a, b) = (uid("u1"), uid("u2"));
        let mine = feed
            .push(&a, None, "for a", NotificationKind::System, None)
            .await
            .unwrap();
        let theirs = feed
            .push(&b, None, "for b", NotificationKind::System, None)
            .await
            .unwrap();

        let flipped = feed
            .mark_read(&a, MarkRead::Ids(vec![mine.id, theirs.id]))
            .await
            .unwrap();
        assert_eq!(flipped, 1);
        assert_eq!(feed.unread_count(&a).await, 0);
        assert_eq!(feed.unread_count(&b).await, 1);

        assert_eq!(feed.mark_read(&b, MarkRead::All).await.unwrap(), 1);
        assert_eq!(feed.unread_count(&b).await, 0);
    }

    #[tokio::test]
    async fn subscription_sees_new_items() {
        let feed = NotificationFeed::new(seeded_store().await);
        let a = uid("u1");
        let mut sub = feed.subscribe(&a);
        let wait = Duration::from_secs(2);
        let first = timeout(wait, sub.next_snapshot()).await.unwrap().unwrap();
        assert!(first.items.is_empty());

        feed.push(&a, None, "ping", NotificationKind::System, None)
            .await
            .unwrap();
        let snap = timeout(wait, sub.next_snapshot()).await.unwrap().unwrap();
        assert_eq!(count_unread_notifications(&snap.items), 1);
        assert_eq!(snap.items[0].message, "ping");
    }
}
