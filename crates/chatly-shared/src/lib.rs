//! # chatly-shared
//!
//! Identifier newtypes, timestamps and status enums shared by the store,
//! the core services and the HTTP server.

pub mod constants;
pub mod error;
pub mod types;

pub use error::ParseError;
pub use types::*;
