//! Blob storage seam used for file messages.
//!
//! The core only needs "store bytes under a path, get back a URL".  The
//! server provides a filesystem implementation; [`MemoryBlobStore`] backs
//! tests and ephemeral setups.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chatly_shared::constants::CHAT_FILES_PREFIX;
use chatly_shared::ChatId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `path` and return a URL it can be fetched from.
    async fn store(&self, bytes: Bytes, path: &str) -> Result<String, BlobError>;
}

/// `chatFiles/{chat_id}/{file_name}`, rejecting names that could escape
/// the chat's directory.
pub fn chat_file_path(chat_id: ChatId, file_name: &str) -> Result<String, BlobError> {
    let name = file_name.trim();
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
        || name.chars().any(char::is_control)
    {
        return Err(BlobError::InvalidPath(file_name.to_string()));
    }
    Ok(format!("{CHAT_FILES_PREFIX}/{chat_id}/{name}"))
}

/// In-process blob store keyed by path.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.blobs.lock().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, bytes: Bytes, path: &str) -> Result<String, BlobError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| BlobError::Storage("blob map poisoned".to_string()))?;
        blobs.insert(path.to_string(), bytes);
        Ok(format!("memory://{path}"))
    }
}
