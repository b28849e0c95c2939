//! Chat directory: one conversation per unordered pair of users.

use std::collections::BTreeMap;

use chatly_shared::constants::NEW_CHAT_PREVIEW;
use chatly_shared::{ChatId, UserId, UserPair};
use chatly_store::{Batch, Change, Chat, Reader, Store, UserSummary};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::friendship;
use crate::sync::{self, Subscription};

/// Find the chat for the pair or insert a fresh one.  Runs inside the
/// caller's batch.
///
/// Chats are keyed on the sorted pair, so two parties racing to open the
/// same conversation end up with the same row: the loser's insert is a
/// no-op and it re-reads the winner's chat.
pub(crate) fn find_or_create_in(
    b: &mut Batch<'_>,
    a: &UserSummary,
    other: &UserSummary,
) -> Result<ChatId> {
    let pair = UserPair::new(&a.id, &other.id)
        .ok_or_else(|| CoreError::InvalidArgument("cannot open a chat with yourself".into()))?;
    if let Some(chat) = b.reader().chat_by_pair(&pair)? {
        return Ok(chat.id);
    }

    let now = b.now();
    let chat = Chat {
        id: ChatId::new(),
        user_ids: [a.id.clone(), other.id.clone()],
        users: [a.clone(), other.clone()],
        last_message: NEW_CHAT_PREVIEW.to_string(),
        last_message_timestamp: now,
        created_at: now,
        unread_count: BTreeMap::new(),
    };
    if b.insert_chat_if_absent(&chat)? {
        info!(chat = %chat.id, a = %a.id, b = %other.id, "chat created");
        return Ok(chat.id);
    }
    b.reader()
        .chat_by_pair(&pair)?
        .map(|c| c.id)
        .ok_or_else(|| CoreError::Conflict("chat insert lost to a vanished row".into()))
}

pub(crate) fn summary_in(reader: Reader<'_>, id: &UserId) -> Result<UserSummary> {
    reader
        .find_user(id)?
        .map(|u| u.summary())
        .ok_or_else(|| CoreError::NotFound(format!("user {id}")))
}

/// Chats of `user` whose counterpart is currently a friend, most recent
/// first.  Friendship is checked at read time, so unfriending hides a chat
/// without deleting it.
pub(crate) fn chats_for_user_in(reader: Reader<'_>, user: &UserId) -> Result<Vec<Chat>> {
    let friends = friendship::friend_ids_in(reader, user)?;
    Ok(reader
        .chats_containing(user)?
        .into_iter()
        .filter(|chat| chat.counterpart(user).is_some_and(|o| friends.contains(o)))
        .collect())
}

#[derive(Clone)]
pub struct ChatDirectory {
    store: Store,
}

impl ChatDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Id of the chat between the two users, creating it if needed.
    pub async fn find_or_create(&self, a: &UserSummary, b: &UserSummary) -> Result<ChatId> {
        let (a, other) = (a.clone(), b.clone());
        self.store
            .write(move |batch| find_or_create_in(batch, &a, &other))
            .await
    }

    /// Same as [`find_or_create`](Self::find_or_create), loading both
    /// profiles from the directory.
    pub async fn find_or_create_between(&self, a: &UserId, b: &UserId) -> Result<ChatId> {
        let (a, other) = (a.clone(), b.clone());
        self.store
            .write(move |batch| -> Result<ChatId> {
                let a = summary_in(batch.reader(), &a)?;
                let other = summary_in(batch.reader(), &other)?;
                find_or_create_in(batch, &a, &other)
            })
            .await
    }

    pub async fn chat(&self, id: ChatId) -> Result<Chat> {
        self.store
            .read(move |r| -> Result<Chat> {
                r.find_chat(id)?
                    .ok_or_else(|| CoreError::NotFound(format!("chat {id}")))
            })
            .await
    }

    /// Friend-filtered chat list.  Degrades to an empty list.
    pub async fn list_for_user(&self, user: &UserId) -> Vec<Chat> {
        let user = user.clone();
        let who = user.clone();
        match self.store.read(move |r| chats_for_user_in(r, &user)).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(user = %who, error = %e, "listing chats failed");
                Vec::new()
            }
        }
    }

    /// Update the preview line and bump the chat to the top of lists.
    pub async fn touch(&self, id: ChatId, preview: &str) -> Result<()> {
        let preview = preview.to_string();
        self.store
            .write(move |b| -> Result<()> {
                if b.touch_chat(id, &preview)? {
                    Ok(())
                } else {
                    Err(CoreError::NotFound(format!("chat {id}")))
                }
            })
            .await
    }

    /// Live friend-filtered chat list of `user`.
    pub fn subscribe_for_user(&self, user: &UserId) -> Subscription<Chat> {
        let (watch, user) = (user.clone(), user.clone());
        sync::subscribe(
            &self.store,
            "chat_list",
            move |c| match c {
                Change::Chat { .. } | Change::FriendRequest { .. } => c.involves(&watch),
                _ => false,
            },
            move |r| chats_for_user_in(r, &user),
        )
    }
}
