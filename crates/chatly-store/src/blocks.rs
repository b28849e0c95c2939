//! CRUD operations for [`Block`] records.

use chatly_shared::UserId;
use rusqlite::params;

use crate::batch::{Batch, Reader};
use crate::changes::Change;
use crate::error::Result;
use crate::models::Block;
use crate::rows::{collect, parse_col, ts_col};

impl Reader<'_> {
    /// Blocks placed by `user`, newest first.
    pub fn blocks_by(&self, user: &UserId) -> Result<Vec<Block>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, blocked_by, blocked_user, ts_s, ts_ns FROM blocks
             WHERE blocked_by = ?1
             ORDER BY ts_s DESC, ts_ns DESC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], row_to_block)?;
        collect(rows)
    }

    pub fn is_blocked(&self, by: &UserId, user: &UserId) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM blocks WHERE blocked_by = ?1 AND blocked_user = ?2",
            params![by.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}

impl Batch<'_> {
    /// Record a block.  Returns `false` if the same block already exists.
    pub fn insert_block(&mut self, block: &Block) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO blocks (id, blocked_by, blocked_user, ts_s, ts_ns)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                block.id.to_string(),
                block.blocked_by.as_str(),
                block.blocked_user.as_str(),
                block.timestamp.seconds,
                block.timestamp.nanos,
            ],
        )?;
        if affected > 0 {
            self.record(Change::Block {
                id: block.id,
                blocked_by: block.blocked_by.clone(),
                blocked_user: block.blocked_user.clone(),
            });
        }
        Ok(affected > 0)
    }
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: parse_col(row, 0)?,
        blocked_by: parse_col(row, 1)?,
        blocked_user: parse_col(row, 2)?,
        timestamp: ts_col(row, 3)?,
    })
}
