//! Cloneable async handle over a [`Database`].
//!
//! SQLite calls are blocking, so every operation runs on the tokio blocking
//! pool against a mutex-guarded connection.  Locks are never held across an
//! `.await`.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::batch::{Batch, Reader};
use crate::changes::{Change, ChangeBus};
use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    bus: ChangeBus,
}

impl Store {
    pub fn new(db: Database, bus_capacity: usize) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            bus: ChangeBus::new(bus_capacity),
        }
    }

    /// Fresh in-memory store with the default bus capacity.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            chatly_shared::constants::DEFAULT_CHANGE_BUS_CAPACITY,
        ))
    }

    /// Receive every change committed from now on.
    pub fn changes(&self) -> broadcast::Receiver<Change> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Run a read-only closure against the database.
    pub async fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Reader<'_>) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> std::result::Result<T, E> {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(guard.reader())
        })
        .await
        .map_err(|e| E::from(StoreError::Join(e.to_string())))?
    }

    /// Run a closure inside a transaction and commit it.
    ///
    /// If the closure returns `Err` the transaction is rolled back and no
    /// change is published.  On success the recorded changes are published
    /// while the connection lock is still held, so bus order matches commit
    /// order.
    pub async fn write<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Batch<'_>) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let bus = self.bus.clone();
        tokio::task::spawn_blocking(move || -> std::result::Result<T, E> {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            let mut batch = guard.batch()?;
            let out = f(&mut batch)?;
            let changes = batch.commit()?;
            tracing::trace!(changes = changes.len(), "batch committed");
            bus.publish(changes);
            Ok(out)
        })
        .await
        .map_err(|e| E::from(StoreError::Join(e.to_string())))?
    }
}
