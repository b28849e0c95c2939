//! Read and write handles over a connection.
//!
//! Query helpers live on [`Reader`]; mutations live on [`Batch`], which
//! wraps a SQLite transaction.  Entity modules (`users`, `chats`, ...) add
//! their methods to both types.

use chatly_shared::Timestamp;
use rusqlite::{Connection, Transaction};

use crate::changes::Change;
use crate::error::Result;

/// Borrowed query handle.
#[derive(Clone, Copy)]
pub struct Reader<'c> {
    conn: &'c Connection,
}

impl<'c> Reader<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn conn(&self) -> &'c Connection {
        self.conn
    }
}

/// Transactional writer.  Writes become visible together on
/// [`Batch::commit`]; dropping an uncommitted batch rolls everything back.
pub struct Batch<'c> {
    tx: Transaction<'c>,
    now: Timestamp,
    changes: Vec<Change>,
}

impl<'c> Batch<'c> {
    pub(crate) fn new(tx: Transaction<'c>, now: Timestamp) -> Self {
        Self {
            tx,
            now,
            changes: Vec::new(),
        }
    }

    /// Reads inside the transaction observe the batch's own writes.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.tx)
    }

    /// Server timestamp shared by every write in this batch.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.tx
    }

    pub(crate) fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn commit(self) -> Result<Vec<Change>> {
        self.tx.commit()?;
        Ok(self.changes)
    }
}
