//! Unread tracking across every chat of a viewer.
//!
//! Counts are always derived from the message log with [`count_unread`];
//! the per-chat cache on [`chatly_store::Chat`] is never consulted here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatly_shared::{ChatId, UserId};
use chatly_store::{Chat, Message};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamMap;
use tracing::debug;

use crate::messages::MessageLog;
use crate::sync::{Disposer, Subscription};

/// Messages in `messages` that `viewer` neither sent nor read.
pub fn count_unread(messages: &[Message], viewer: &UserId) -> u32 {
    messages.iter().filter(|m| m.is_unread_for(viewer)).count() as u32
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounts {
    pub per_chat: BTreeMap<ChatId, u32>,
    pub total: u32,
}

impl UnreadCounts {
    fn set(&mut self, chat: ChatId, count: u32) {
        self.per_chat.insert(chat, count);
        self.total = self.per_chat.values().sum();
    }

    fn retain(&mut self, chats: &BTreeSet<ChatId>) {
        self.per_chat.retain(|id, _| chats.contains(id));
        self.total = self.per_chat.values().sum();
    }

    pub fn for_chat(&self, chat: ChatId) -> u32 {
        self.per_chat.get(&chat).copied().unwrap_or(0)
    }
}

/// Follows a viewer's chat list and keeps one message subscription per
/// chat, publishing aggregated counts on a watch channel.
pub struct UnreadTracker {
    counts: watch::Receiver<UnreadCounts>,
    task: JoinHandle<()>,
    disposed: Arc<AtomicBool>,
}

impl UnreadTracker {
    /// Start tracking.  `chats` is the viewer's live chat list; chats that
    /// leave it stop being counted.
    pub fn spawn(viewer: UserId, mut chats: Subscription<Chat>, log: MessageLog) -> Self {
        let (tx, counts) = watch::channel(UnreadCounts::default());
        let disposed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disposed);

        let task = tokio::spawn(async move {
            let mut per_chat: StreamMap<ChatId, Subscription<Message>> = StreamMap::new();
            let mut current = UnreadCounts::default();
            loop {
                tokio::select! {
                    snapshot = chats.next() => {
                        let Some(snapshot) = snapshot else { break };
                        let ids: BTreeSet<ChatId> = snapshot.items.iter().map(|c| c.id).collect();
                        let stale: Vec<ChatId> = per_chat
                            .keys()
                            .filter(|id| !ids.contains(id))
                            .copied()
                            .collect();
                        for id in stale {
                            per_chat.remove(&id);
                        }
                        for id in &ids {
                            if !per_chat.contains_key(id) {
                                per_chat.insert(*id, log.subscribe(*id));
                            }
                        }
                        current.retain(&ids);
                    }
                    Some((chat, snapshot)) = per_chat.next(), if !per_chat.is_empty() => {
                        current.set(chat, count_unread(&snapshot.items, &viewer));
                    }
                }
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                tx.send_if_modified(|published| {
                    if *published == current {
                        false
                    } else {
                        *published = current.clone();
                        true
                    }
                });
            }
            debug!(viewer = %viewer, "unread tracker stopped");
        });

        Self {
            counts,
            task,
            disposed,
        }
    }

    /// Latest counts.
    pub fn current(&self) -> UnreadCounts {
        self.counts.borrow().clone()
    }

    /// Receiver that wakes on every change of the counts.
    pub fn watch(&self) -> watch::Receiver<UnreadCounts> {
        self.counts.clone()
    }

    pub fn disposer(&self) -> Disposer {
        Disposer::new(self.task.abort_handle(), Arc::clone(&self.disposed))
    }

    /// Current counts followed by every change.  The stream owns the
    /// tracker, so dropping it stops tracking.
    pub fn into_stream(self) -> impl Stream<Item = UnreadCounts> + Send + 'static {
        let counts = WatchStream::new(self.watch());
        futures::stream::unfold((self, counts), |(tracker, mut counts)| async move {
            let next = counts.next().await?;
            Some((next, (tracker, counts)))
        })
    }
}

impl Drop for UnreadTracker {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use chatly_shared::{MessageId, Timestamp};
    use chatly_store::MessagePayload;
    use tokio::time::timeout;

    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::chats::ChatDirectory;
    use crate::testing::{befriend, seeded_store, uid};

    fn msg(sender: &str, readers: &[&str]) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: uid(sender),
            timestamp: Timestamp::new(1, 0),
            payload: MessagePayload::text("x"),
            read_by: readers.iter().map(|r| uid(r)).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn own_messages_never_count() {
        let messages = [
            msg("a", &["a"]),
            msg("a", &[]),
            msg("b", &["b"]),
            msg("b", &["b", "a"]),
        ];
        assert_eq!(count_unread(&messages, &uid("a")), 1);
        assert_eq!(count_unread(&messages, &uid("b")), 2);
        assert_eq!(count_unread(&[], &uid("a")), 0);
    }

    async fn wait_for(
        rx: &mut watch::Receiver<UnreadCounts>,
        pred: impl Fn(&UnreadCounts) -> bool,
    ) -> UnreadCounts {
        timeout(Duration::from_secs(5), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return rx.borrow().clone();
                }
                rx.changed().await.expect("tracker stopped");
            }
        })
        .await
        .expect("timed out waiting for counts")
    }

    #[tokio::test]
    async fn totals_follow_messages_and_reads_across_chats() {
        let store = seeded_store().await;
        befriend(&store, "u1", "u2").await;
        befriend(&store, "u1", "u3").await;
        let chats = ChatDirectory::new(store.clone());
        let log = MessageLog::new(store.clone(), Arc::new(MemoryBlobStore::new()));
        let (a, b, c) = (uid("u1"), uid("u2"), uid("u3"));
        let with_b = chats.find_or_create_between(&a, &b).await.unwrap();
        let with_c = chats.find_or_create_between(&a, &c).await.unwrap();

        let tracker = UnreadTracker::spawn(a.clone(), chats.subscribe_for_user(&a), log.clone());
        let mut rx = tracker.watch();

        log.append(with_b, &b, MessagePayload::text("hi")).await.unwrap();
        log.append(with_b, &b, MessagePayload::text("there")).await.unwrap();
        log.append(with_c, &c, MessagePayload::text("yo")).await.unwrap();
        log.append(with_c, &a, MessagePayload::text("mine")).await.unwrap();

        let counts = wait_for(&mut rx, |c| c.total == 3 && c.for_chat(with_c) == 1).await;
        assert_eq!(counts.for_chat(with_b), 2);

        log.mark_read(with_b, &a).await.unwrap();
        let counts = wait_for(&mut rx, |c| c.total == 1).await;
        assert_eq!(counts.for_chat(with_b), 0);
        assert_eq!(tracker.current().total, 1);
    }

    #[tokio::test]
    async fn unfriended_chats_drop_out_of_the_total() {
        let store = seeded_store().await;
        befriend(&store, "u1", "u2").await;
        let chats = ChatDirectory::new(store.clone());
        let log = MessageLog::new(store.clone(), Arc::new(MemoryBlobStore::new()));
        let (a, b) = (uid("u1"), uid("u2"));
        let chat = chats.find_or_create_between(&a, &b).await.unwrap();

        let tracker = UnreadTracker::spawn(a.clone(), chats.subscribe_for_user(&a), log.clone());
        let mut rx = tracker.watch();
        log.append(chat, &b, MessagePayload::text("hi")).await.unwrap();
        wait_for(&mut rx, |c| c.total == 1).await;

        crate::friendship::FriendshipLedger::new(store)
            .remove_friendship(&a, &b)
            .await
            .unwrap();
        let counts = wait_for(&mut rx, |c| c.total == 0).await;
        assert!(counts.per_chat.is_empty());

        let disposer = tracker.disposer();
        disposer.dispose();
        assert!(disposer.is_disposed());
    }

    #[tokio::test]
    async fn streamed_counts_stop_with_the_stream() {
        let store = seeded_store().await;
        befriend(&store, "u1", "u2").await;
        let chats = ChatDirectory::new(store.clone());
        let log = MessageLog::new(store.clone(), Arc::new(MemoryBlobStore::new()));
        let (a, b) = (uid("u1"), uid("u2"));
        let chat = chats.find_or_create_between(&a, &b).await.unwrap();

        let tracker = UnreadTracker::spawn(a.clone(), chats.subscribe_for_user(&a), log.clone());
        let disposer = tracker.disposer();
        let mut counts = Box::pin(tracker.into_stream());
        assert_eq!(counts.next().await.map(|c| c.total), Some(0));

        log.append(chat, &b, MessagePayload::text("hi")).await.unwrap();
        let counts_now = timeout(Duration::from_secs(5), async {
            loop {
                let c = counts.next().await.expect("stream ended");
                if c.total == 1 {
                    return c;
                }
            }
        })
        .await
        .expect("timed out waiting for counts");
        assert_eq!(counts_now.for_chat(chat), 1);

        drop(counts);
        assert!(disposer.is_disposed());
    }
}
