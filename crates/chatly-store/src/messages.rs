//! CRUD operations for [`Message`] records and their read receipts.

use std::collections::{BTreeSet, HashMap};

use chatly_shared::{ChatId, FileKind, MessageId, UserId};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessagePayload};
use crate::rows::{collect, parse_col, parse_opt_col, ts_col};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, ts_s, ts_ns, text, file_url, file_type";

impl Reader<'_> {
    /// Every message of a chat, oldest first, with read receipts attached.
    pub fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1
             ORDER BY ts_s ASC, ts_ns ASC, id ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;
        let mut messages = collect(rows)?;

        let mut stmt = self.conn().prepare(
            "SELECT r.message_id, r.user_id FROM message_reads r
             JOIN messages m ON m.id = r.message_id
             WHERE m.chat_id = ?1",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            Ok((parse_col::<MessageId>(row, 0)?, parse_col::<UserId>(row, 1)?))
        })?;
        let mut readers: HashMap<MessageId, BTreeSet<UserId>> = HashMap::new();
        for (message_id, user) in collect(rows)? {
            readers.entry(message_id).or_default().insert(user);
        }
        for message in &mut messages {
            if let Some(set) = readers.remove(&message.id) {
                message.read_by = set;
            }
        }
        Ok(messages)
    }

    pub fn message(&self, id: MessageId) -> Result<Message> {
        self.find_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_message(&self, id: MessageId) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        let Some(mut message) = self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .optional()?
        else {
            return Ok(None);
        };
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM message_reads WHERE message_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| parse_col::<UserId>(row, 0))?;
        message.read_by = collect(rows)?.into_iter().collect();
        Ok(Some(message))
    }

    /// Messages of `chat_id` that `viewer` has not read and did not send.
    pub fn unread_message_ids(&self, chat_id: ChatId, viewer: &UserId) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id FROM messages m
             WHERE m.chat_id = ?1 AND m.sender_id != ?2
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = m.id AND r.user_id = ?2)
             ORDER BY m.ts_s ASC, m.ts_ns ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string(), viewer.as_str()], |row| {
            parse_col::<MessageId>(row, 0)
        })?;
        collect(rows)
    }

    pub fn unread_count(&self, chat_id: ChatId, viewer: &UserId) -> Result<u32> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.chat_id = ?1 AND m.sender_id != ?2
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = m.id AND r.user_id = ?2)",
            params![chat_id.to_string(), viewer.as_str()],
            |row| row.get(0),
        )?)
    }
}

impl Batch<'_> {
    /// Insert a message with its initial receipts and refresh the chat's
    /// unread cache.
    pub fn insert_message(&mut self, message: &Message) -> Result<()> {
        let (text, file_url, file_type) = match &message.payload {
            MessagePayload::Text { text } => (Some(text.as_str()), None, None),
            MessagePayload::File {
                file_url,
                file_type,
            } => (None, Some(file_url.as_str()), Some(file_type.as_str())),
        };
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, ts_s, ts_ns, text, file_url, file_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.as_str(),
                message.timestamp.seconds,
                message.timestamp.nanos,
                text,
                file_url,
                file_type,
            ],
        )?;
        for reader in &message.read_by {
            self.conn().execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                params![message.id.to_string(), reader.as_str()],
            )?;
        }
        self.record(Change::Message {
            chat_id: message.chat_id,
            id: message.id,
        });
        self.refresh_unread_cache(message.chat_id)
    }

    /// Add `user` to the message's read set.  Returns `false` when already
    /// present.
    pub fn add_reader(&mut self, chat_id: ChatId, id: MessageId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id)
             SELECT id, ?2 FROM messages WHERE id = ?1 AND chat_id = ?3",
            params![id.to_string(), user.as_str(), chat_id.to_string()],
        )?;
        if affected == 0 {
            return Ok(false);
        }
        self.record(Change::Message { chat_id, id });
        self.refresh_unread_cache(chat_id)?;
        Ok(true)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let text: Option<String> = row.get(5)?;
    let file_url: Option<String> = row.get(6)?;
    let file_type: Option<FileKind> = parse_opt_col(row, 7)?;
    let payload = match (text, file_url, file_type) {
        (Some(text), None, _) => MessagePayload::Text { text },
        (None, Some(file_url), Some(file_type)) => MessagePayload::File {
            file_url,
            file_type,
        },
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                5,
                "text".to_string(),
                Type::Null,
            ))
        }
    };
    Ok(Message {
        id: parse_col(row, 0)?,
        chat_id: parse_col(row, 1)?,
        sender_id: parse_col(row, 2)?,
        timestamp: ts_col(row, 3)?,
        payload,
        read_by: BTreeSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::fixtures::{chat_between, seeded_db, uid};
    use chatly_shared::Timestamp;

    fn setup() -> (Database, ChatId) {
        let mut db = seeded_db();
        let chat = chat_between(&db, "u1", "u2");
        let mut batch = db.batch().unwrap();
        batch.insert_chat_if_absent(&chat).unwrap();
        batch.commit().unwrap();
        (db, chat.id)
    }

    fn text_from(chat_id: ChatId, sender: &str, text: &str, seconds: i64) -> Message {
        Message {
            id: MessageId::new(),
            chat_id,
            sender_id: uid(sender),
            timestamp: Timestamp::new(seconds, 0),
            payload: MessagePayload::text(text),
            read_by: BTreeSet::from([uid(sender)]),
        }
    }

    #[test]
    fn ordered_by_timestamp_with_receipts() {
        let (mut db, chat_id) = setup();
        let late = text_from(chat_id, "u1", "second", 20);
        let early = text_from(chat_id, "u2", "first", 10);
        let mut batch = db.batch().unwrap();
        batch.insert_message(&late).unwrap();
        batch.insert_message(&early).unwrap();
        batch.commit().unwrap();

        let messages = db.reader().messages_for_chat(chat_id).unwrap();
        assert_eq!(messages, vec![early.clone(), late]);
        assert_eq!(db.reader().message(early.id).unwrap(), early);
    }

    #[test]
    fn file_payload_survives_storage() {
        let (mut db, chat_id) = setup();
        let mut msg = text_from(chat_id, "u1", "", 10);
        msg.payload = MessagePayload::File {
            file_url: "http://files/a.png".to_string(),
            file_type: FileKind::Image,
        };
        let mut batch = db.batch().unwrap();
        batch.insert_message(&msg).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.reader().message(msg.id).unwrap().payload, msg.payload);
    }

    #[test]
    fn reading_updates_cache_and_is_idempotent() {
        let (mut db, chat_id) = setup();
        let a = text_from(chat_id, "u1", "one", 10);
        let b = text_from(chat_id, "u1", "two", 11);
        let mut batch = db.batch().unwrap();
        batch.insert_message(&a).unwrap();
        batch.insert_message(&b).unwrap();
        batch.commit().unwrap();

        let reader = db.reader();
        assert_eq!(reader.unread_count(chat_id, &uid("u2")).unwrap(), 2);
        assert_eq!(reader.unread_count(chat_id, &uid("u1")).unwrap(), 0);
        assert_eq!(
            reader.unread_message_ids(chat_id, &uid("u2")).unwrap(),
            vec![a.id, b.id]
        );
        assert_eq!(reader.chat(chat_id).unwrap().unread_count[&uid("u2")], 2);

        let mut batch = db.batch().unwrap();
        assert!(batch.add_reader(chat_id, a.id, &uid("u2")).unwrap());
        assert!(!batch.add_reader(chat_id, a.id, &uid("u2")).unwrap());
        assert!(!batch.add_reader(ChatId::new(), b.id, &uid("u2")).unwrap());
        batch.commit().unwrap();

        let reader = db.reader();
        assert_eq!(reader.unread_count(chat_id, &uid("u2")).unwrap(), 1);
        assert_eq!(reader.chat(chat_id).unwrap().unread_count[&uid("u2")], 1);
        assert!(reader.message(a.id).unwrap().read_by.contains(&uid("u2")));
    }

    #[test]
    fn messages_require_an_existing_chat() {
        let mut db = seeded_db();
        let orphan = text_from(ChatId::new(), "u1", "lost", 1);
        let mut batch = db.batch().unwrap();
        assert!(batch.insert_message(&orphan).is_err());
    }
}
