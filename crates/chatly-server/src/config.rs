//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use chatly_shared::constants::{DEFAULT_CHANGE_BUS_CAPACITY, MAX_FILE_SIZE};
use chatly_store::Database;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory, `chatly.db`
    pub database_path: Option<PathBuf>,

    /// Directory chat attachments are written to.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./files`
    pub blob_storage_path: PathBuf,

    /// Base of the URLs handed out for stored files.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Env: `MAX_BLOB_SIZE`
    pub max_blob_size: usize,

    /// Buffered changes per subscriber before it lags and re-reads.
    /// Env: `CHANGE_BUS_CAPACITY`
    pub change_bus_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            blob_storage_path: PathBuf::from("./files"),
            public_base_url: "http://localhost:8080".to_string(),
            max_blob_size: MAX_FILE_SIZE,
            change_bus_capacity: DEFAULT_CHANGE_BUS_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = var("BLOB_STORAGE_PATH").filter(|p| !p.trim().is_empty()) {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(url) = var("PUBLIC_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.public_base_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid PUBLIC_BASE_URL, using default");
            }
        }

        if let Some(val) = var("MAX_BLOB_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_blob_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BLOB_SIZE, using default"),
            }
        }

        if let Some(val) = var("CHANGE_BUS_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.change_bus_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid CHANGE_BUS_CAPACITY, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Configured database path, or the platform default.
    pub fn resolve_database_path(&self) -> chatly_store::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Database::default_path(),
        }
    }
}
