//! # chatly-core
//!
//! The social and messaging core of Chatly: friend requests and the
//! friendship they imply, notifications, one-to-one chats, the message log
//! with read receipts, derived unread counts, and realtime subscriptions
//! over all of it.
//!
//! Every component takes its collaborators (store, blob store, auth context)
//! explicitly.  [`Chatly`] wires them together for callers that want the
//! whole thing.

pub mod auth;
pub mod blob;
pub mod chats;
pub mod error;
pub mod friendship;
pub mod inbox;
pub mod messages;
pub mod notifications;
pub mod sync;
pub mod unread;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chatly_shared::{ChatId, RequestAction, RequestId, UserId};
use chatly_store::{FriendRequest, Message, MessagePayload, Store};
use serde::Serialize;
use tracing::info;

pub use auth::{AuthContext, Session};
pub use blob::{BlobError, BlobStore, MemoryBlobStore};
pub use chats::ChatDirectory;
pub use error::{CoreError, ErrorKind, Result};
pub use friendship::{Direction, FriendshipLedger, RequestEntry};
pub use inbox::Inbox;
pub use messages::MessageLog;
pub use notifications::{MarkRead, NotificationFeed};
pub use sync::{Disposer, Disposers, Snapshot, Subscription};
pub use unread::{count_unread, UnreadCounts, UnreadTracker};
pub use users::{ProfileUpdate, UserDirectory};

/// Result of answering a friend request.  Accepting also opens the chat
/// between the two users.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    pub request: FriendRequest,
    pub chat_id: Option<ChatId>,
}

/// All components over one store.
#[derive(Clone)]
pub struct Chatly {
    store: Store,
    auth: AuthContext,
    users: UserDirectory,
    friends: FriendshipLedger,
    notifications: NotificationFeed,
    chats: ChatDirectory,
    messages: MessageLog,
}

impl Chatly {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>, auth: AuthContext) -> Self {
        Self {
            users: UserDirectory::new(store.clone()),
            friends: FriendshipLedger::new(store.clone()),
            notifications: NotificationFeed::new(store.clone()),
            chats: ChatDirectory::new(store.clone()),
            messages: MessageLog::new(store.clone(), blobs),
            store,
            auth,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn friends(&self) -> &FriendshipLedger {
        &self.friends
    }

    pub fn notifications(&self) -> &NotificationFeed {
        &self.notifications
    }

    pub fn chats(&self) -> &ChatDirectory {
        &self.chats
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    /// Answer a friend request; on acceptance the pair's chat is created
    /// (or found) right away.
    pub async fn respond(
        &self,
        request_id: RequestId,
        responder: &UserId,
        action: RequestAction,
    ) -> Result<RequestOutcome> {
        let request = self.friends.respond(request_id, responder, action).await?;
        let chat_id = match action {
            RequestAction::Accepted => Some(
                self.chats
                    .find_or_create_between(&request.from, &request.to)
                    .await?,
            ),
            RequestAction::Rejected => None,
        };
        Ok(RequestOutcome { request, chat_id })
    }

    /// Send to a friend without knowing the chat id.  The friendship check,
    /// chat lookup or creation, and the insert share one batch.
    pub async fn send_to(
        &self,
        sender: &UserId,
        recipient: &UserId,
        payload: MessagePayload,
    ) -> Result<Message> {
        messages::validate_payload(&payload)?;
        let (sender, recipient) = (sender.clone(), recipient.clone());
        let message = self
            .store
            .write(move |b| -> Result<Message> {
                if !friendship::are_friends_in(b.reader(), &sender, &recipient)? {
                    return Err(CoreError::Forbidden(format!(
                        "{sender} and {recipient} are not friends"
                    )));
                }
                let from = chats::summary_in(b.reader(), &sender)?;
                let to = chats::summary_in(b.reader(), &recipient)?;
                let chat_id = chats::find_or_create_in(b, &from, &to)?;
                messages::append_in(b, chat_id, &sender, payload)
            })
            .await?;
        info!(
            chat = %message.chat_id,
            message = %message.id,
            sender = %message.sender_id,
            "message sent"
        );
        Ok(message)
    }

    /// Open the live views of the signed-in user.
    pub fn open_inbox(&self) -> Result<Inbox> {
        let user = self
            .auth
            .current_user_id()
            .ok_or_else(|| CoreError::Forbidden("not signed in".into()))?;
        let tracker = UnreadTracker::spawn(
            user.clone(),
            self.chats.subscribe_for_user(&user),
            self.messages.clone(),
        );
        Ok(Inbox::new(
            user.clone(),
            self.chats.subscribe_for_user(&user),
            self.notifications.subscribe(&user),
            self.friends.subscribe_incoming(&user),
            tracker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatly_shared::{FriendStatus, NotificationKind};
    use tokio::time::timeout;

    use super::*;
    use crate::testing::{seeded_store, until, uid};

    async fn chatly() -> Chatly {
        Chatly::new(
            seeded_store().await,
            Arc::new(MemoryBlobStore::new()),
            AuthContext::new(),
        )
    }

    #[tokio::test]
    async fn strangers_become_friends_and_chat() {
        let app = chatly().await;
        let (a, b) = (uid("u1"), uid("u2"));

        let request = app.friends().send_request(&a, &b).await.unwrap();
        assert_eq!(app.friends().status(&a, &b).await.unwrap(), FriendStatus::Requested);

        let outcome = app.respond(request.id, &b, RequestAction::Accepted).await.unwrap();
        assert_eq!(app.friends().status(&a, &b).await.unwrap(), FriendStatus::Accepted);
        assert!(app.friends().are_friends(&b, &a).await.unwrap());

        let feed = app.notifications().list(&a).await;
        let accepted: Vec<_> = feed
            .iter()
            .filter(|n| n.kind == NotificationKind::FriendAccepted && !n.read)
            .collect();
        assert_eq!(accepted.len(), 1);

        let chat_id = outcome.chat_id.expect("accepting opens a chat");
        app.messages()
            .append(chat_id, &a, MessagePayload::text("hi"))
            .await
            .unwrap();
        assert_eq!(app.chats().chat(chat_id).await.unwrap().last_message, "hi");
    }

    #[tokio::test]
    async fn unfriending_hides_the_chat_and_blocks_sending() {
        let app = chatly().await;
        let (a, b) = (uid("u1"), uid("u2"));
        let request = app.friends().send_request(&a, &b).await.unwrap();
        app.respond(request.id, &b, RequestAction::Accepted).await.unwrap();
        let sent = app.send_to(&a, &b, MessagePayload::text("hello")).await.unwrap();

        app.friends().remove_friendship(&a, &b).await.unwrap();
        assert!(app.chats().list_for_user(&a).await.is_empty());
        assert_eq!(app.chats().chat(sent.chat_id).await.unwrap().last_message, "hello");
        assert_eq!(app.messages().messages(sent.chat_id, &a).await.unwrap().len(), 1);

        let err = app
            .messages()
            .append(sent.chat_id, &a, MessagePayload::text("still there?"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = app
            .send_to(&a, &b, MessagePayload::text("still there?"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn send_to_reuses_the_chat_and_counts_unread() {
        let app = chatly().await;
        let (a, b) = (uid("u1"), uid("u2"));
        let request = app.friends().send_request(&a, &b).await.unwrap();
        let outcome = app.respond(request.id, &b, RequestAction::Accepted).await.unwrap();

        let first = app.send_to(&a, &b, MessagePayload::text("one")).await.unwrap();
        let second = app.send_to(&b, &a, MessagePayload::text("two")).await.unwrap();
        app.send_to(&a, &b, MessagePayload::text("three")).await.unwrap();
        assert_eq!(Some(first.chat_id), outcome.chat_id);
        assert_eq!(first.chat_id, second.chat_id);

        assert_eq!(app.messages().unread_count(first.chat_id, &b).await, 2);
        assert_eq!(app.messages().unread_count(first.chat_id, &a).await, 1);
        app.messages().mark_read(first.chat_id, &b).await.unwrap();
        assert_eq!(app.messages().unread_count(first.chat_id, &b).await, 0);
    }

    #[tokio::test]
    async fn rejecting_opens_no_chat() {
        let app = chatly().await;
        let (a, b) = (uid("u1"), uid("u2"));
        let request = app.friends().send_request(&a, &b).await.unwrap();
        let outcome = app.respond(request.id, &b, RequestAction::Rejected).await.unwrap();
        assert!(outcome.chat_id.is_none());
        assert!(app.chats().list_for_user(&b).await.is_empty());
    }

    #[tokio::test]
    async fn inbox_requires_sign_in_and_closes_everything() {
        let app = chatly().await;
        assert_eq!(app.open_inbox().err().map(|e| e.kind()), Some(ErrorKind::Forbidden));

        let (a, b) = (uid("u1"), uid("u2"));
        app.auth().sign_in(Session {
            user_id: a.clone(),
            email: "alice@example.com".into(),
        });
        let mut inbox = app.open_inbox().unwrap();
        assert_eq!(inbox.user(), &a);

        app.friends().send_request(&b, &a).await.unwrap();
        let pending = until(&mut inbox.requests, |s| s.items.len() == 1).await;
        assert_eq!(pending.items[0].from, b);
        until(&mut inbox.notifications, |s| s.items.len() == 1).await;

        let request_id = pending.items[0].id;
        app.respond(request_id, &a, RequestAction::Accepted).await.unwrap();
        until(&mut inbox.chats, |s| s.items.len() == 1).await;
        app.send_to(&b, &a, MessagePayload::text("hey")).await.unwrap();

        let mut counts = inbox.unread().watch();
        timeout(Duration::from_secs(5), async {
            while counts.borrow_and_update().total != 1 {
                counts.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(inbox.unread_counts().total, 1);

        assert!(inbox.is_open());
        inbox.close();
        assert!(!inbox.is_open());
        assert!(inbox.chats.is_disposed());
        assert!(inbox.notifications.next_snapshot().await.is_none());
    }
}
