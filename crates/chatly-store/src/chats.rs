//! CRUD operations for [`Chat`] records and their unread cache.

use std::collections::BTreeMap;

use chatly_shared::{ChatId, UserId, UserPair};
use rusqlite::{params, Connection, OptionalExtension};

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::{Result, StoreError};
use crate::models::{Chat, UserSummary};
use crate::rows::{collect, conversion_err, parse_col, ts_col};

const CHAT_COLUMNS: &str =
    "id, user_a, user_b, users_json, last_message, last_s, last_ns, created_s, created_ns";

impl Reader<'_> {
    pub fn chat(&self, id: ChatId) -> Result<Chat> {
        self.find_chat(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_chat(&self, id: ChatId) -> Result<Option<Chat>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
        let chat = self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_chat)
            .optional()?;
        chat.map(|c| with_unread(self.conn(), c)).transpose()
    }

    /// The chat for an unordered pair, if one exists.
    pub fn chat_by_pair(&self, pair: &UserPair) -> Result<Option<Chat>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE pair_key = ?1");
        let chat = self
            .conn()
            .query_row(&sql, params![pair.key()], row_to_chat)
            .optional()?;
        chat.map(|c| with_unread(self.conn(), c)).transpose()
    }

    /// Chats `user` is a member of, most recent activity first.
    pub fn chats_containing(&self, user: &UserId) -> Result<Vec<Chat>> {
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY last_s DESC, last_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![user.as_str()], row_to_chat)?;
        collect(rows)?
            .into_iter()
            .map(|c| with_unread(self.conn(), c))
            .collect()
    }
}

impl Batch<'_> {
    /// Insert `chat` unless its pair already has one.  Returns `true` when
    /// the row was written.
    pub fn insert_chat_if_absent(&mut self, chat: &Chat) -> Result<bool> {
        let [a, b] = &chat.user_ids;
        let pair = UserPair::new(a, b)
            .ok_or_else(|| StoreError::Invalid("chat with a single member".to_string()))?;
        let users_json = serde_json::to_string(&chat.users)?;
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chats (id, pair_key, user_a, user_b, users_json, last_message,
                                          last_s, last_ns, created_s, created_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                chat.id.to_string(),
                pair.key(),
                a.as_str(),
                b.as_str(),
                users_json,
                chat.last_message,
                chat.last_message_timestamp.seconds,
                chat.last_message_timestamp.nanos,
                chat.created_at.seconds,
                chat.created_at.nanos,
            ],
        )?;
        if affected == 0 {
            return Ok(false);
        }
        for member in &chat.user_ids {
            self.conn().execute(
                "INSERT INTO chat_unread (chat_id, user_id, count) VALUES (?1, ?2, 0)",
                params![chat.id.to_string(), member.as_str()],
            )?;
        }
        self.record(Change::Chat {
            id: chat.id,
            members: chat.user_ids.clone(),
        });
        Ok(true)
    }

    /// Set the preview text and stamp it with the batch time.
    pub fn touch_chat(&mut self, id: ChatId, preview: &str) -> Result<bool> {
        let Some(chat) = self.reader().find_chat(id)? else {
            return Ok(false);
        };
        let now = self.now();
        self.conn().execute(
            "UPDATE chats SET last_message = ?1, last_s = ?2, last_ns = ?3 WHERE id = ?4",
            params![preview, now.seconds, now.nanos, id.to_string()],
        )?;
        self.record(Change::Chat {
            id,
            members: chat.user_ids,
        });
        Ok(true)
    }

    /// Recompute the cached unread counts of every member from the message
    /// log.
    pub fn refresh_unread_cache(&mut self, id: ChatId) -> Result<()> {
        let Some(chat) = self.reader().find_chat(id)? else {
            return Err(StoreError::NotFound);
        };
        let mut dirty = false;
        for member in &chat.user_ids {
            let count = self.reader().unread_count(id, member)?;
            if chat.unread_count.get(member) == Some(&count) {
                continue;
            }
            self.conn().execute(
                "INSERT OR REPLACE INTO chat_unread (chat_id, user_id, count) VALUES (?1, ?2, ?3)",
                params![id.to_string(), member.as_str(), count],
            )?;
            dirty = true;
        }
        if dirty {
            self.record(Change::Chat {
                id,
                members: chat.user_ids,
            });
        }
        Ok(())
    }
}

fn with_unread(conn: &Connection, mut chat: Chat) -> Result<Chat> {
    let mut stmt = conn.prepare("SELECT user_id, count FROM chat_unread WHERE chat_id = ?1")?;
    let rows = stmt.query_map(params![chat.id.to_string()], |row| {
        Ok((parse_col::<UserId>(row, 0)?, row.get::<_, u32>(1)?))
    })?;
    chat.unread_count = collect(rows)?.into_iter().collect::<BTreeMap<_, _>>();
    Ok(chat)
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let users_json: String = row.get(3)?;
    let users: [UserSummary; 2] =
        serde_json::from_str(&users_json).map_err(|e| conversion_err(3, e))?;
    Ok(Chat {
        id: parse_col(row, 0)?,
        user_ids: [parse_col(row, 1)?, parse_col(row, 2)?],
        users,
        last_message: row.get(4)?,
        last_message_timestamp: ts_col(row, 5)?,
        created_at: ts_col(row, 7)?,
        unread_count: BTreeMap::new(),
    })
}
