//! CRUD operations for [`FriendRequest`] records.

use chatly_shared::{RequestId, RequestStatus, UserId, UserPair};
use rusqlite::{params, OptionalExtension};

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::{Result, StoreError};
use crate::models::FriendRequest;
use crate::rows::{collect, parse_col, ts_col};

const REQUEST_COLUMNS: &str = "id, from_user, to_user, from_name, from_username, from_image, \
     status, created_s, created_ns, updated_s, updated_ns";

impl Reader<'_> {
    pub fn friend_request(&self, id: RequestId) -> Result<FriendRequest> {
        self.find_friend_request(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_friend_request(&self, id: RequestId) -> Result<Option<FriendRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_request)
            .optional()?)
    }

    /// Requests sent by `from` to `to`, one direction only.
    pub fn requests_from_to(
        &self,
        from: &UserId,
        to: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<FriendRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE from_user = ?1 AND to_user = ?2 AND (?3 IS NULL OR status = ?3)
             ORDER BY created_s DESC, created_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![from.as_str(), to.as_str(), status.map(RequestStatus::as_str)],
            row_to_request,
        )?;
        collect(rows)
    }

    /// Every request between the two users, in either direction.
    pub fn requests_between(&self, pair: &UserPair) -> Result<Vec<FriendRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE pair_key = ?1
             ORDER BY created_s DESC, created_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![pair.key()], row_to_request)?;
        collect(rows)
    }

    /// Requests addressed to `to`, newest first.
    pub fn incoming_requests(
        &self,
        to: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<FriendRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE to_user = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_s DESC, created_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![to.as_str(), status.map(RequestStatus::as_str)],
            row_to_request,
        )?;
        collect(rows)
    }

    /// Requests sent by `from`, newest first.
    pub fn outgoing_requests(
        &self,
        from: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<FriendRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE from_user = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_s DESC, created_ns DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![from.as_str(), status.map(RequestStatus::as_str)],
            row_to_request,
        )?;
        collect(rows)
    }
}

impl Batch<'_> {
    /// Insert a request.  A second active request for the same pair is
    /// rejected by the partial unique index and surfaces as a constraint
    /// violation.
    pub fn insert_friend_request(&mut self, request: &FriendRequest) -> Result<()> {
        let pair = UserPair::new(&request.from, &request.to).ok_or_else(|| {
            StoreError::Invalid("friend request from a user to themselves".to_string())
        })?;
        self.conn().execute(
            "INSERT INTO friend_requests (id, from_user, to_user, pair_key, from_name,
                                          from_username, from_image, status,
                                          created_s, created_ns, updated_s, updated_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                request.id.to_string(),
                request.from.as_str(),
                request.to.as_str(),
                pair.key(),
                request.from_name,
                request.from_username,
                request.from_image,
                request.status.as_str(),
                request.created_at.seconds,
                request.created_at.nanos,
                request.updated_at.seconds,
                request.updated_at.nanos,
            ],
        )?;
        self.record(request_change(request));
        Ok(())
    }

    /// Move a request to `status`, stamping `updated_at`.
    pub fn set_request_status(
        &mut self,
        request: &FriendRequest,
        status: RequestStatus,
    ) -> Result<bool> {
        let now = self.now();
        let affected = self.conn().execute(
            "UPDATE friend_requests SET status = ?1, updated_s = ?2, updated_ns = ?3 WHERE id = ?4",
            params![status.as_str(), now.seconds, now.nanos, request.id.to_string()],
        )?;
        if affected > 0 {
            self.record(request_change(request));
        }
        Ok(affected > 0)
    }

    pub fn delete_friend_request(&mut self, request: &FriendRequest) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friend_requests WHERE id = ?1",
            params![request.id.to_string()],
        )?;
        if affected > 0 {
            self.record(request_change(request));
        }
        Ok(affected > 0)
    }
}

fn request_change(request: &FriendRequest) -> Change {
    Change::FriendRequest {
        id: request.id,
        from: request.from.clone(),
        to: request.to.clone(),
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: parse_col(row, 0)?,
        from: parse_col(row, 1)?,
        to: parse_col(row, 2)?,
        from_name: row.get(3)?,
        from_username: row.get(4)?,
        from_image: row.get(5)?,
        status: parse_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seeded_db, uid};
    use chatly_shared::Timestamp;

    fn request(from: &str, to: &str, status: RequestStatus) -> FriendRequest {
        FriendRequest {
            id: RequestId::new(),
            from: uid(from),
            to: uid(to),
            from_name: from.to_string(),
            from_username: from.to_string(),
            from_image: None,
            status,
            created_at: Timestamp::new(10, 0),
            updated_at: Timestamp::new(10, 0),
        }
    }

    #[test]
    fn second_active_request_for_pair_is_rejected() {
        let mut db = seeded_db();
        let mut batch = db.batch().unwrap();
        batch
            .insert_friend_request(&request("u1", "u2", RequestStatus::Pending))
            .unwrap();
        let err = batch
            .insert_friend_request(&request("u2", "u1", RequestStatus::Pending))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn rejected_requests_do_not_occupy_the_pair() {
        let mut db = seeded_db();
        let mut batch = db.batch().unwrap();
        batch
            .insert_friend_request(&request("u1", "u2", RequestStatus::Rejected))
            .unwrap();
        batch
            .insert_friend_request(&request("u1", "u2", RequestStatus::Pending))
            .unwrap();
        batch.commit().unwrap();

        let pair = UserPair::new(&uid("u1"), &uid("u2")).unwrap();
        assert_eq!(db.reader().requests_between(&pair).unwrap().len(), 2);
    }

    #[test]
    fn status_update_and_directional_queries() {
        let mut db = seeded_db();
        let req = request("u1", "u2", RequestStatus::Pending);
        let mut batch = db.batch().unwrap();
        batch.insert_friend_request(&req).unwrap();
        batch.commit().unwrap();

        let mut batch = db.batch().unwrap();
        assert!(batch.set_request_status(&req, RequestStatus::Accepted).unwrap());
        batch.commit().unwrap();

        let reader = db.reader();
        let stored = reader.friend_request(req.id).unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert!(stored.updated_at > stored.created_at);
        assert_eq!(
            reader
                .incoming_requests(&uid("u2"), Some(RequestStatus::Accepted))
                .unwrap()
                .len(),
            1
        );
        assert!(reader
            .incoming_requests(&uid("u2"), Some(RequestStatus::Pending))
            .unwrap()
            .is_empty());
        assert_eq!(reader.outgoing_requests(&uid("u1"), None).unwrap().len(), 1);
        assert!(reader
            .requests_from_to(&uid("u2"), &uid("u1"), None)
            .unwrap()
            .is_empty());
    }
}
