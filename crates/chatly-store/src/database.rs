//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] plus the server
//! [`Clock`], and guarantees that migrations are run before any other
//! operation.

use std::path::{Path, PathBuf};

use chatly_shared::Timestamp;
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension};

use crate::batch::{Batch, Reader};
use crate::clock::Clock;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    clock: Clock,
}

impl Database {
    /// Default database file in the platform data directory, creating the
    /// parent directory:
    /// - Linux:   `~/.local/share/chatly/chatly.db`
    /// - macOS:   `~/Library/Application Support/app.chatly.chatly/chatly.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\chatly\chatly\data\chatly.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("app", "chatly", "chatly").ok_or(StoreError::NoDataDir)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join("chatly.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.  Used by tests and ephemeral
    /// deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        let clock = Clock::resume_after(newest_message_timestamp(&conn)?);
        Ok(Self { conn, clock })
    }

    /// Query helpers over the live connection.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.conn)
    }

    /// Start an all-or-nothing write.  Every write in the batch is stamped
    /// with the same server timestamp.
    pub fn batch(&mut self) -> Result<Batch<'_>> {
        let now = self.clock.tick();
        let tx = self.conn.transaction()?;
        Ok(Batch::new(tx, now))
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

fn newest_message_timestamp(conn: &Connection) -> Result<Timestamp> {
    let newest = conn
        .query_row(
            "SELECT ts_s, ts_ns FROM messages ORDER BY ts_s DESC, ts_ns DESC LIMIT 1",
            [],
            |row| Ok(Timestamp::new(row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(newest.unwrap_or_default())
}
