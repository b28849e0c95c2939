//! Shared helpers for the core's unit tests.

use std::time::Duration;

use chatly_shared::{Presence, RequestAction, Timestamp, UserId};
use chatly_store::{Store, User};
use tokio::time::timeout;

use crate::friendship::FriendshipLedger;
use crate::sync::{Snapshot, Subscription};

pub(crate) fn uid(s: &str) -> UserId {
    UserId::parse(s).unwrap()
}

/// In-memory store holding `alice` (u1), `bob` (u2) and `carol` (u3).
pub(crate) async fn seeded_store() -> Store {
    let store = Store::open_in_memory().unwrap();
    store
        .write(|b| {
            for (id, name) in [("u1", "alice"), ("u2", "bob"), ("u3", "carol")] {
                b.insert_user(&User {
                    id: uid(id),
                    email: format!("{name}@example.com"),
                    username: name.to_string(),
                    full_name: format!("{name} tester"),
                    image: None,
                    presence: Presence::Offline,
                    last_seen: Timestamp::new(1, 0),
                    created_at: Timestamp::new(1, 0),
                })?;
            }
            Ok::<_, chatly_store::StoreError>(())
        })
        .await
        .unwrap();
    store
}

/// Make `a` and `b` friends through the normal request flow.
pub(crate) async fn befriend(store: &Store, a: &str, b: &str) {
    let ledger = FriendshipLedger::new(store.clone());
    let request = ledger.send_request(&uid(a), &uid(b)).await.unwrap();
    ledger
        .respond(request.id, &uid(b), RequestAction::Accepted)
        .await
        .unwrap();
}

/// Wait for the first snapshot satisfying `pred`.
pub(crate) async fn until<T>(
    sub: &mut Subscription<T>,
    pred: impl Fn(&Snapshot<T>) -> bool,
) -> Snapshot<T> {
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = sub.next_snapshot().await.expect("subscription ended");
            if pred(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
