//! CRUD operations for [`User`] records.

use chatly_shared::constants::PREFIX_RANGE_END;
use chatly_shared::{Presence, UserId};
use rusqlite::{params, OptionalExtension};

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::rows::{collect, parse_col, ts_col};

const USER_COLUMNS: &str = "id, email, username, full_name, image, presence, \
                            last_seen_s, last_seen_ns, created_s, created_ns";

impl Reader<'_> {
    /// Fetch a single user by id.
    pub fn user(&self, id: &UserId) -> Result<User> {
        self.find_user(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.as_str()], row_to_user)
            .optional()?)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![username], row_to_user)
            .optional()?)
    }

    /// Users whose username starts with `prefix`, via the range
    /// `[prefix, prefix + U+F8FF]`.  `prefix` is expected lowercase.
    pub fn search_users(&self, prefix: &str, limit: usize) -> Result<Vec<User>> {
        let upper = format!("{prefix}{PREFIX_RANGE_END}");
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username >= ?1 AND username <= ?2
             ORDER BY username ASC
             LIMIT ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![prefix, upper, i64::try_from(limit).unwrap_or(i64::MAX)],
            row_to_user,
        )?;
        collect(rows)
    }
}

impl Batch<'_> {
    pub fn insert_user(&mut self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, email, username, full_name, image, presence,
                                last_seen_s, last_seen_ns, created_s, created_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id.as_str(),
                user.email,
                user.username,
                user.full_name,
                user.image,
                user.presence.as_str(),
                user.last_seen.seconds,
                user.last_seen.nanos,
                user.created_at.seconds,
                user.created_at.nanos,
            ],
        )?;
        self.record(Change::User {
            id: user.id.clone(),
        });
        Ok(())
    }

    /// Overwrite the editable profile fields.  Returns `false` if the user
    /// does not exist.
    pub fn update_profile(
        &mut self,
        id: &UserId,
        full_name: &str,
        image: Option<&str>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET full_name = ?1, image = ?2 WHERE id = ?3",
            params![full_name, image, id.as_str()],
        )?;
        if affected > 0 {
            self.record(Change::User { id: id.clone() });
        }
        Ok(affected > 0)
    }

    /// Update presence and stamp `last_seen` with the batch time.
    pub fn set_presence(&mut self, id: &UserId, presence: Presence) -> Result<bool> {
        let now = self.now();
        let affected = self.conn().execute(
            "UPDATE users SET presence = ?1, last_seen_s = ?2, last_seen_ns = ?3 WHERE id = ?4",
            params![presence.as_str(), now.seconds, now.nanos, id.as_str()],
        )?;
        if affected > 0 {
            self.record(Change::User { id: id.clone() });
        }
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_col(row, 0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3)?,
        image: row.get(4)?,
        presence: parse_col(row, 5)?,
        last_seen: ts_col(row, 6)?,
        created_at: ts_col(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::fixtures::sample_user;

    #[test]
    fn insert_and_fetch() {
        let mut db = Database::open_in_memory().unwrap();
        let user = sample_user("u1", "alice");
        let mut batch = db.batch().unwrap();
        batch.insert_user(&user).unwrap();
        batch.commit().unwrap();

        assert_eq!(db.reader().user(&user.id).unwrap(), user);
        assert!(matches!(
            db.reader().user(&UserId::parse("nobody").unwrap()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn duplicate_username_is_a_constraint_violation() {
        let mut db = Database::open_in_memory().unwrap();
        let mut batch = db.batch().unwrap();
        batch.insert_user(&sample_user("u1", "alice")).unwrap();
        let err = batch.insert_user(&sample_user("u2", "alice")).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn prefix_search_is_range_bounded() {
        let mut db = Database::open_in_memory().unwrap();
        let mut batch = db.batch().unwrap();
        for (id, name) in [("u1", "alice"), ("u2", "alicia"), ("u3", "bob"), ("u4", "al")] {
            batch.insert_user(&sample_user(id, name)).unwrap();
        }
        batch.commit().unwrap();

        let names: Vec<String> = db
            .reader()
            .search_users("ali", 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "alicia"]);
        assert_eq!(db.reader().search_users("al", 1).unwrap().len(), 1);
    }

    #[test]
    fn presence_updates_last_seen() {
        let mut db = Database::open_in_memory().unwrap();
        let user = sample_user("u1", "alice");
        let mut batch = db.batch().unwrap();
        batch.insert_user(&user).unwrap();
        batch.commit().unwrap();

        let mut batch = db.batch().unwrap();
        let stamp = batch.now();
        assert!(batch.set_presence(&user.id, Presence::Online).unwrap());
        batch.commit().unwrap();

        let stored = db.reader().user(&user.id).unwrap();
        assert_eq!(stored.presence, Presence::Online);
        assert_eq!(stored.last_seen, stamp);
    }
}
