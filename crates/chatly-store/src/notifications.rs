//! CRUD operations for [`Notification`] records.

use chatly_shared::{NotificationId, NotificationKind, RequestId, UserId};
use rusqlite::params;

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::Result;
use crate::models::Notification;
use crate::rows::{collect, parse_col, parse_opt_col, ts_col};

const NOTIFICATION_COLUMNS: &str =
    "id, to_user, from_user, message, kind, read, ts_s, ts_ns, request_id";

impl Reader<'_> {
    /// Notifications addressed to `to`, newest first.
    pub fn notifications_for(&self, to: &UserId) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE to_user = ?1
             ORDER BY ts_s DESC, ts_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![to.as_str()], row_to_notification)?;
        collect(rows)
    }

    /// Notifications of `kind` that point back at `request_id`.
    pub fn notifications_for_request(
        &self,
        request_id: RequestId,
        kind: NotificationKind,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE request_id = ?1 AND kind = ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![request_id.to_string(), kind.as_str()],
            row_to_notification,
        )?;
        collect(rows)
    }
}

impl Batch<'_> {
    pub fn insert_notification(&mut self, notification: &Notification) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications (id, to_user, from_user, message, kind, read,
                                        ts_s, ts_ns, request_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                notification.id.to_string(),
                notification.to.as_str(),
                notification.from.as_ref().map(UserId::as_str),
                notification.message,
                notification.kind.as_str(),
                notification.read as i32,
                notification.timestamp.seconds,
                notification.timestamp.nanos,
                notification.request_id.map(|r| r.to_string()),
            ],
        )?;
        self.record(Change::Notification {
            id: notification.id,
            to: notification.to.clone(),
        });
        Ok(())
    }

    /// Mark the given notifications read.  Ids that belong to another
    /// recipient are ignored.  Returns how many rows flipped.
    pub fn mark_notifications_read(
        &mut self,
        to: &UserId,
        ids: &[NotificationId],
    ) -> Result<usize> {
        let mut flipped = 0;
        for id in ids {
            let affected = self.conn().execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND to_user = ?2 AND read = 0",
                params![id.to_string(), to.as_str()],
            )?;
            if affected > 0 {
                flipped += affected;
                self.record(Change::Notification {
                    id: *id,
                    to: to.clone(),
                });
            }
        }
        Ok(flipped)
    }

    /// Mark every unread notification of `to` read.
    pub fn mark_all_notifications_read(&mut self, to: &UserId) -> Result<usize> {
        let ids: Vec<NotificationId> = self
            .reader()
            .notifications_for(to)?
            .into_iter()
            .filter(|n| !n.read)
            .map(|n| n.id)
            .collect();
        self.mark_notifications_read(to, &ids)
    }

    pub fn delete_notification(&mut self, notification: &Notification) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1",
            params![notification.id.to_string()],
        )?;
        if affected > 0 {
            self.record(Change::Notification {
                id: notification.id,
                to: notification.to.clone(),
            });
        }
        Ok(affected > 0)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let read: i32 = row.get(5)?;
    Ok(Notification {
        id: parse_col(row, 0)?,
        to: parse_col(row, 1)?,
        from: parse_opt_col(row, 2)?,
        message: row.get(3)?,
        kind: parse_col(row, 4)?,
        read: read != 0,
        timestamp: ts_col(row, 6)?,
        request_id: parse_opt_col(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seeded_db, uid};
    use chatly_shared::Timestamp;

    fn notification(to: &str, seconds: i64) -> Notification {
        Notification {
            id: NotificationId::new(),
            to: uid(to),
            from: Some(uid("u3")),
            message: format!("hello {to}"),
            kind: NotificationKind::System,
            read: false,
            timestamp: Timestamp::new(seconds, 0),
            request_id: None,
        }
    }

    #[test]
    fn newest_first() {
        let mut db = seeded_db();
        let older = notification("u1", 10);
        let newer = notification("u1", 20);
        let mut batch = db.batch().unwrap();
        batch.insert_notification(&older).unwrap();
        batch.insert_notification(&newer).unwrap();
        batch.commit().unwrap();

        let ids: Vec<_> = db
            .reader()
            .notifications_for(&uid("u1"))
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn mark_read_ignores_foreign_ids() {
        let mut db = seeded_db();
        let mine = notification("u1", 10);
        let theirs = notification("u2", 10);
        let mut batch = db.batch().unwrap();
        batch.insert_notification(&mine).unwrap();
        batch.insert_notification(&theirs).unwrap();
        batch.commit().unwrap();

        let mut batch = db.batch().unwrap();
        let flipped = batch
            .mark_notifications_read(&uid("u1"), &[mine.id, theirs.id])
            .unwrap();
        batch.commit().unwrap();
        assert_eq!(flipped, 1);

        let reader = db.reader();
        assert!(reader.notifications_for(&uid("u1")).unwrap()[0].read);
        assert!(!reader.notifications_for(&uid("u2")).unwrap()[0].read);
    }

    #[test]
    fn mark_all_only_touches_unread_rows() {
        let mut db = seeded_db();
        let mut batch = db.batch().unwrap();
        batch.insert_notification(&notification("u1", 1)).unwrap();
        batch.insert_notification(&notification("u1", 2)).unwrap();
        batch.commit().unwrap();

        let mut batch = db.batch().unwrap();
        assert_eq!(batch.mark_all_notifications_read(&uid("u1")).unwrap(), 2);
        assert_eq!(batch.mark_all_notifications_read(&uid("u1")).unwrap(), 0);
        assert_eq!(batch.changes().len(), 2);
    }
}
