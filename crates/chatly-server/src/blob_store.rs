use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chatly_core::{BlobError, BlobStore};
use tokio::fs;
use tracing::{debug, info};

/// Resolve a relative blob path under `base`, refusing anything that could
/// step outside it.
fn ensure_within(base: &Path, relative: &str) -> Result<PathBuf, BlobError> {
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BlobError::InvalidPath(relative.to_string()));
            }
        }
    }
    if depth == 0 || !resolved.starts_with(base) {
        return Err(BlobError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}

/// Chat attachments on the local filesystem, served back under `/files/`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    public_base_url: String,
    max_size: usize,
}

impl LocalBlobStore {
    pub async fn new(
        base_path: PathBuf,
        public_base_url: &str,
        max_size: usize,
    ) -> Result<Self, BlobError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            BlobError::Storage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/files/{}", self.public_base_url, path)
    }

    pub async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        let full = ensure_within(&self.base_path, path)?;
        match fs::read(&full).await {
            Ok(data) => {
                debug!(path, size = data.len(), "Read blob");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, bytes: Bytes, path: &str) -> Result<String, BlobError> {
        if bytes.len() > self.max_size {
            return Err(BlobError::TooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }
        let full = ensure_within(&self.base_path, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, &bytes).await?;

        debug!(path, size = bytes.len(), "Stored blob");
        Ok(self.url_for(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (LocalBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "http://files.test/", 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let (store, dir) = test_store().await;
        let url = store
            .store(Bytes::from_static(b"hello"), "chatFiles/c1/note.txt")
            .await
            .unwrap();
        assert_eq!(url, "http://files.test/files/chatFiles/c1/note.txt");
        assert!(dir.path().join("chatFiles/c1/note.txt").exists());

        let data = store.read("chatFiles/c1/note.txt").await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        for path in ["../outside", "/etc/passwd", "chatFiles/../../x", ""] {
            let err = store.store(Bytes::from_static(b"x"), path).await.unwrap_err();
            assert!(matches!(err, BlobError::InvalidPath(_)), "{path}");
        }
        assert!(matches!(
            store.read("../secret").await,
            Err(BlobError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_limits_and_missing() {
        let (store, _dir) = test_store().await;
        let big = Bytes::from(vec![0u8; 2048]);
        assert!(matches!(
            store.store(big, "chatFiles/c1/big.bin").await,
            Err(BlobError::TooLarge { size: 2048, max: 1024 })
        ));
        assert!(matches!(
            store.read("chatFiles/c1/missing").await,
            Err(BlobError::NotFound(_))
        ));
    }
}
