//! # chatly-server
//!
//! HTTP front end for the Chatly core.
//!
//! This binary provides:
//! - **REST API** (axum) over users, friend requests, notifications, chats
//!   and messages
//! - **Attachment storage** on the local filesystem, served back under
//!   `/files/`
//! - **Live updates** as server-sent events under `/events/`
//!
//! Authentication happens upstream; the caller's uid arrives in the
//! `X-User-Id` header.

mod api;
mod blob_store;
mod config;
mod error;
mod events;
mod views;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use chatly_core::{AuthContext, Chatly};
use chatly_shared::constants::APP_NAME;
use chatly_store::{Database, Store};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::LocalBlobStore;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatly_server=debug,chatly_core=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and the attachment directory
    // -----------------------------------------------------------------------
    let db_path = config.resolve_database_path()?;
    info!(path = %db_path.display(), "Opening database");
    let store = Store::new(Database::open_at(&db_path)?, config.change_bus_capacity);

    let blobs = Arc::new(
        LocalBlobStore::new(
            config.blob_storage_path.clone(),
            &config.public_base_url,
            config.max_blob_size,
        )
        .await?,
    );

    let app_state = AppState {
        chatly: Chatly::new(store, blobs.clone(), AuthContext::new()),
        blobs,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
