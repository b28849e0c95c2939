//! Message log: per-chat ordered messages with read receipts.
//!
//! Sending is gated on friendship between the two members of the chat.
//! The gate is evaluated inside the same batch that inserts the message, so
//! a concurrent unfriend cannot slip between the check and the write.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use chatly_shared::constants::{MAX_FILE_SIZE, MAX_TEXT_LEN};
use chatly_shared::{ChatId, FileKind, MessageId, UserId};
use chatly_store::{Batch, Change, Chat, Message, MessagePayload, Reader, Store};
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::blob::{chat_file_path, BlobError, BlobStore};
use crate::error::{CoreError, Result};
use crate::friendship;
use crate::sync::{self, Subscription};
use crate::unread::count_unread;

/// Load a chat and check that `member` belongs to it.
fn member_chat(reader: Reader<'_>, chat_id: ChatId, member: &UserId) -> Result<Chat> {
    let chat = reader
        .find_chat(chat_id)?
        .ok_or_else(|| CoreError::NotFound(format!("chat {chat_id}")))?;
    if !chat.has_member(member) {
        return Err(CoreError::Forbidden(format!("not a member of chat {chat_id}")));
    }
    Ok(chat)
}

/// The access-control gate: `sender` is a member and is friends with the
/// other member.
fn check_can_send(reader: Reader<'_>, chat_id: ChatId, sender: &UserId) -> Result<Chat> {
    let chat = member_chat(reader, chat_id, sender)?;
    let other = chat
        .counterpart(sender)
        .ok_or_else(|| CoreError::Forbidden("chat has no counterpart".into()))?;
    if !friendship::are_friends_in(reader, sender, other)? {
        return Err(CoreError::Forbidden(format!(
            "{sender} and {other} are not friends"
        )));
    }
    Ok(chat)
}

pub(crate) fn validate_payload(payload: &MessagePayload) -> Result<()> {
    match payload {
        MessagePayload::Text { text } => {
            if text.trim().is_empty() {
                return Err(CoreError::InvalidArgument("message text is empty".into()));
            }
            if text.chars().count() > MAX_TEXT_LEN {
                return Err(CoreError::InvalidArgument(format!(
                    "message longer than {MAX_TEXT_LEN} characters"
                )));
            }
        }
        MessagePayload::File { file_url, .. } => {
            if file_url.trim().is_empty() {
                return Err(CoreError::InvalidArgument("file url is empty".into()));
            }
        }
    }
    Ok(())
}

/// Gate, insert and touch the preview in one batch.
pub(crate) fn append_in(
    b: &mut Batch<'_>,
    chat_id: ChatId,
    sender: &UserId,
    payload: MessagePayload,
) -> Result<Message> {
    check_can_send(b.reader(), chat_id, sender)?;
    let message = Message {
        id: MessageId::new(),
        chat_id,
        sender_id: sender.clone(),
        timestamp: b.now(),
        payload,
        read_by: BTreeSet::from([sender.clone()]),
    };
    b.insert_message(&message)?;
    b.touch_chat(chat_id, &message.payload.preview())?;
    Ok(message)
}

#[derive(Clone)]
pub struct MessageLog {
    store: Store,
    blobs: Arc<dyn BlobStore>,
}

impl MessageLog {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Append a message to a chat.  Fails `Forbidden` unless the sender is
    /// a member and friends with the other member.
    pub async fn append(
        &self,
        chat_id: ChatId,
        sender: &UserId,
        payload: MessagePayload,
    ) -> Result<Message> {
        validate_payload(&payload)?;
        let sender = sender.clone();
        let message = self
            .store
            .write(move |b| append_in(b, chat_id, &sender, payload))
            .await?;
        info!(chat = %chat_id, message = %message.id, sender = %message.sender_id, "message sent");
        Ok(message)
    }

    /// Upload a file to the blob store and append it as a file message.
    ///
    /// The gate is checked before the upload so strangers cannot park
    /// blobs, and again when the message is written.
    pub async fn send_file(
        &self,
        chat_id: ChatId,
        sender: &UserId,
        file_name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<Message> {
        if bytes.is_empty() {
            return Err(CoreError::InvalidArgument("file is empty".into()));
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(BlobError::TooLarge {
                size: bytes.len(),
                max: MAX_FILE_SIZE,
            }
            .into());
        }
        let path = chat_file_path(chat_id, file_name)?;
        let owner = sender.clone();
        self.store
            .read(move |r| check_can_send(r, chat_id, &owner))
            .await?;

        let size = bytes.len();
        let file_url = self.blobs.store(bytes, &path).await?;
        debug!(chat = %chat_id, path = %path, size, "file uploaded");

        let payload = MessagePayload::File {
            file_url,
            file_type: FileKind::from_content_type(content_type),
        };
        self.append(chat_id, sender, payload).await
    }

    /// Messages of a chat visible to `viewer`, oldest first.
    pub async fn messages(&self, chat_id: ChatId, viewer: &UserId) -> Result<Vec<Message>> {
        let viewer = viewer.clone();
        self.store
            .read(move |r| -> Result<Vec<Message>> {
                member_chat(r, chat_id, &viewer)?;
                Ok(r.messages_for_chat(chat_id)?)
            })
            .await
    }

    /// Add `viewer` to the read set of every message they have not read.
    ///
    /// One write per message, issued together and joined.  Safe to repeat;
    /// returns how many receipts were added.
    pub async fn mark_read(&self, chat_id: ChatId, viewer: &UserId) -> Result<usize> {
        let who = viewer.clone();
        let unread = self
            .store
            .read(move |r| -> Result<Vec<MessageId>> {
                member_chat(r, chat_id, &who)?;
                Ok(r.unread_message_ids(chat_id, &who)?)
            })
            .await?;
        if unread.is_empty() {
            return Ok(0);
        }

        let writes = unread.into_iter().map(|id| {
            let viewer = viewer.clone();
            self.store
                .write(move |b| -> Result<bool> { Ok(b.add_reader(chat_id, id, &viewer)?) })
        });
        let added = try_join_all(writes).await?.into_iter().filter(|a| *a).count();
        debug!(chat = %chat_id, viewer = %viewer, added, "messages marked read");
        Ok(added)
    }

    /// Derived unread count for one chat.  Degrades to zero.
    pub async fn unread_count(&self, chat_id: ChatId, viewer: &UserId) -> u32 {
        let who = viewer.clone();
        let result: Result<Vec<Message>> = self
            .store
            .read(move |r| Ok(r.messages_for_chat(chat_id)?))
            .await;
        match result {
            Ok(messages) => count_unread(&messages, &who),
            Err(e) => {
                warn!(chat = %chat_id, viewer = %who, error = %e, "unread count failed");
                0
            }
        }
    }

    /// Live, timestamp-ordered message list of a chat.
    pub fn subscribe(&self, chat_id: ChatId) -> Subscription<Message> {
        sync::subscribe(
            &self.store,
            "messages",
            move |c| matches!(c, Change::Message { chat_id: id, .. } if *id == chat_id),
            move |r| {
                let mut messages = r.messages_for_chat(chat_id)?;
                messages.sort_by_key(|m| m.timestamp);
                Ok(messages)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use chatly_shared::constants::IMAGE_PREVIEW;
    use chatly_store::Receipt;

    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::chats::ChatDirectory;
    use crate::error::ErrorKind;
    use crate::friendship::FriendshipLedger;
    use crate::testing::{befriend, seeded_store, uid, until};

    async fn friends_with_chat() -> (Store, MessageLog, Arc<MemoryBlobStore>, ChatId) {
        let store = seeded_store().await;
        befriend(&store, "u1", "u2").await;
        let chat = ChatDirectory::new(store.clone())
            .find_or_create_between(&uid("u1"), &uid("u2"))
            .await
            .unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let log = MessageLog::new(store.clone(), blobs.clone());
        (store, log, blobs, chat)
    }

    #[tokio::test]
    async fn append_updates_preview_and_receipts() {
        let (store, log, _, chat) = friends_with_chat().await;
        let (a, b) = (uid("u1"), uid("u2"));

        let message = log
            .append(chat, &a, MessagePayload::text("hi"))
            .await
            .unwrap();
        assert_eq!(message.read_by, BTreeSet::from([a.clone()]));

        let stored = ChatDirectory::new(store).chat(chat).await.unwrap();
        assert_eq!(stored.last_message, "hi");
        assert_eq!(stored.last_message_timestamp, message.timestamp);
        assert_eq!(stored.unread_count[&b], 1);
        assert_eq!(stored.unread_count[&a], 0);
    }

    #[tokio::test]
    async fn receipts_go_from_delivered_to_read() {
        let (_, log, _, chat) = friends_with_chat().await;
        let (a, b) = (uid("u1"), uid("u2"));

        let sent = log.append(chat, &a, MessagePayload::text("hi")).await.unwrap();
        assert_eq!(sent.receipt_for(&b), Receipt::Delivered);

        log.mark_read(chat, &b).await.unwrap();
        let stored = log.messages(chat, &a).await.unwrap();
        assert_eq!(stored[0].receipt_for(&b), Receipt::Read);
    }

    #[tokio::test]
    async fn strangers_and_outsiders_are_forbidden() {
        let store = seeded_store().await;
        let chat = ChatDirectory::new(store.clone())
            .find_or_create_between(&uid("u1"), &uid("u2"))
            .await
            .unwrap();
        let log = MessageLog::new(store.clone(), Arc::new(MemoryBlobStore::new()));

        let err = log
            .append(chat, &uid("u1"), MessagePayload::text("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        befriend(&store, "u1", "u2").await;
        log.append(chat, &uid("u1"), MessagePayload::text("hello"))
            .await
            .unwrap();

        let err = log
            .append(chat, &uid("u3"), MessagePayload::text("intruder"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = log
            .append(ChatId::new(), &uid("u1"), MessagePayload::text("void"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = log
            .append(chat, &uid("u1"), MessagePayload::text("  "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn unfriending_closes_the_chat_but_keeps_history() {
        let (store, log, _, chat) = friends_with_chat().await;
        let (a, b) = (uid("u1"), uid("u2"));
        log.append(chat, &a, MessagePayload::text("before"))
            .await
            .unwrap();

        FriendshipLedger::new(store.clone())
            .remove_friendship(&a, &b)
            .await
            .unwrap();
        let err = log
            .append(chat, &a, MessagePayload::text("after"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let chats = ChatDirectory::new(store);
        assert!(chats.list_for_user(&a).await.is_empty());
        assert!(chats.chat(chat).await.is_ok());
        assert_eq!(log.messages(chat, &a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_zeroes_unread_and_is_idempotent() {
        let (_, log, _, chat) = friends_with_chat().await;
        let (a, b) = (uid("u1"), uid("u2"));
        for text in ["one", "two", "three"] {
            log.append(chat, &a, MessagePayload::text(text)).await.unwrap();
        }
        log.append(chat, &b, MessagePayload::text("reply")).await.unwrap();

        assert_eq!(log.unread_count(chat, &b).await, 3);
        assert_eq!(log.unread_count(chat, &a).await, 1);

        assert_eq!(log.mark_read(chat, &b).await.unwrap(), 3);
        assert_eq!(log.unread_count(chat, &b).await, 0);
        assert_eq!(log.mark_read(chat, &b).await.unwrap(), 0);
        assert_eq!(log.unread_count(chat, &a).await, 1);

        let err = log.mark_read(chat, &uid("u3")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn files_go_through_the_blob_store() {
        let (_, log, blobs, chat) = friends_with_chat().await;
        let a = uid("u1");
        let message = log
            .send_file(chat, &a, "cat.png", "image/png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        let path = format!("chatFiles/{chat}/cat.png");
        assert_eq!(blobs.get(&path).unwrap(), Bytes::from_static(b"png"));
        assert_eq!(
            message.payload,
            MessagePayload::File {
                file_url: format!("memory://{path}"),
                file_type: FileKind::Image,
            }
        );
        assert_eq!(message.payload.preview(), IMAGE_PREVIEW);

        let err = log
            .send_file(chat, &a, "../escape", "text/plain", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = log
            .send_file(chat, &uid("u3"), "x.pdf", "application/pdf", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn subscription_emits_sorted_full_lists() {
        let (_, log, _, chat) = friends_with_chat().await;
        let (a, b) = (uid("u1"), uid("u2"));
        let mut sub = log.subscribe(chat);
        until(&mut sub, |s| s.items.is_empty()).await;

        log.append(chat, &a, MessagePayload::text("one")).await.unwrap();
        log.append(chat, &b, MessagePayload::text("two")).await.unwrap();
        let snap = until(&mut sub, |s| s.items.len() == 2).await;
        let texts: Vec<_> = snap.items.iter().map(|m| m.payload.preview()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(snap.items[0].timestamp < snap.items[1].timestamp);

        log.mark_read(chat, &b).await.unwrap();
        let snap = until(&mut sub, |s| s.items[0].read_by.contains(&b)).await;
        assert_eq!(count_unread(&snap.items, &b), 0);
    }
}
