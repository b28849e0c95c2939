//! v001 -- Initial schema creation.
//!
//! Timestamps are stored as two INTEGER columns (`*_s` seconds, `*_ns`
//! nanoseconds) so ordering never depends on string formatting.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,    -- auth provider uid
    email       TEXT NOT NULL,
    username    TEXT NOT NULL UNIQUE,         -- lowercase, prefix-searchable
    full_name   TEXT NOT NULL,
    image       TEXT,
    presence    TEXT NOT NULL DEFAULT 'offline',
    last_seen_s INTEGER NOT NULL,
    last_seen_ns INTEGER NOT NULL,
    created_s   INTEGER NOT NULL,
    created_ns  INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Friend requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friend_requests (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    from_user     TEXT NOT NULL,
    to_user       TEXT NOT NULL,
    pair_key      TEXT NOT NULL,              -- sorted "low|high"
    from_name     TEXT NOT NULL,
    from_username TEXT NOT NULL,
    from_image    TEXT,
    status        TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
    created_s     INTEGER NOT NULL,
    created_ns    INTEGER NOT NULL,
    updated_s     INTEGER NOT NULL,
    updated_ns    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_from ON friend_requests(from_user, status);
CREATE INDEX IF NOT EXISTS idx_requests_to ON friend_requests(to_user, status);

-- at most one active request per unordered pair
CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_pair
    ON friend_requests(pair_key)
    WHERE status IN ('pending', 'accepted');

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    to_user    TEXT NOT NULL,
    from_user  TEXT,
    message    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    ts_s       INTEGER NOT NULL,
    ts_ns      INTEGER NOT NULL,
    request_id TEXT                           -- weak ref -> friend_requests(id)
);

CREATE INDEX IF NOT EXISTS idx_notifications_to
    ON notifications(to_user, ts_s DESC, ts_ns DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_request ON notifications(request_id);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    pair_key     TEXT NOT NULL UNIQUE,        -- one chat per unordered pair
    user_a       TEXT NOT NULL,
    user_b       TEXT NOT NULL,
    users_json   TEXT NOT NULL,               -- [UserSummary; 2] snapshot
    last_message TEXT NOT NULL,
    last_s       INTEGER NOT NULL,
    last_ns      INTEGER NOT NULL,
    created_s    INTEGER NOT NULL,
    created_ns   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_user_a ON chats(user_a);
CREATE INDEX IF NOT EXISTS idx_chats_user_b ON chats(user_b);

CREATE TABLE IF NOT EXISTS chat_unread (
    chat_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    count   INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    chat_id   TEXT NOT NULL,                  -- FK -> chats(id)
    sender_id TEXT NOT NULL,
    ts_s      INTEGER NOT NULL,
    ts_ns     INTEGER NOT NULL,
    text      TEXT,
    file_url  TEXT,
    file_type TEXT,

    CHECK ((text IS NULL) <> (file_url IS NULL)),
    CHECK (file_url IS NULL OR file_type IN ('image', 'document')),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, ts_s, ts_ns);

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Blocks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocks (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    blocked_by   TEXT NOT NULL,
    blocked_user TEXT NOT NULL,
    ts_s         INTEGER NOT NULL,
    ts_ns        INTEGER NOT NULL,

    UNIQUE (blocked_by, blocked_user)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
