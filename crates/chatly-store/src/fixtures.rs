//! Test data builders shared by the entity modules.

use std::collections::BTreeMap;

use chatly_shared::{ChatId, Presence, Timestamp, UserId};

use crate::database::Database;
use crate::models::{Chat, User};

pub(crate) fn uid(s: &str) -> UserId {
    UserId::parse(s).unwrap()
}

pub(crate) fn sample_user(id: &str, username: &str) -> User {
    User {
        id: uid(id),
        email: format!("{username}@example.com"),
        username: username.to_string(),
        full_name: format!("{username} tester"),
        image: None,
        presence: Presence::Offline,
        last_seen: Timestamp::new(1, 0),
        created_at: Timestamp::new(1, 0),
    }
}

/// In-memory database pre-populated with `alice` (u1), `bob` (u2) and
/// `carol` (u3).
pub(crate) fn seeded_db() -> Database {
    let mut db = Database::open_in_memory().unwrap();
    let mut batch = db.batch().unwrap();
    for (id, name) in [("u1", "alice"), ("u2", "bob"), ("u3", "carol")] {
        batch.insert_user(&sample_user(id, name)).unwrap();
    }
    batch.commit().unwrap();
    db
}

/// Unsaved chat between two seeded users.
pub(crate) fn chat_between(db: &Database, a: &str, b: &str) -> Chat {
    let reader = db.reader();
    let ua = reader.user(&uid(a)).unwrap();
    let ub = reader.user(&uid(b)).unwrap();
    Chat {
        id: ChatId::new(),
        user_ids: [ua.id.clone(), ub.id.clone()],
        users: [ua.summary(), ub.summary()],
        last_message: "connected".to_string(),
        last_message_timestamp: Timestamp::new(5, 0),
        created_at: Timestamp::new(5, 0),
        unread_count: BTreeMap::new(),
    }
}
