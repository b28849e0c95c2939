//! # chatly-store
//!
//! Document store for Chatly, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] that owns the connection and
//! a server clock, typed query helpers on [`Reader`], an all-or-nothing
//! transactional writer [`Batch`], and the cloneable async [`Store`] handle
//! the core services are built on.  Every committed batch publishes its
//! [`Change`]s on the [`ChangeBus`] so realtime subscribers can re-query.

pub mod batch;
pub mod blocks;
pub mod changes;
pub mod chats;
pub mod clock;
pub mod database;
pub mod friend_requests;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod store;
pub mod users;

mod error;
mod rows;

#[cfg(test)]
pub(crate) mod fixtures;

pub use batch::{Batch, Reader};
pub use changes::{Change, ChangeBus};
pub use clock::Clock;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::Store;
