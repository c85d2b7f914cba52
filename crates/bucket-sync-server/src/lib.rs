//! # bucket-sync-server
//!
//! The remote merge store of bucket-sync: one last-writer-wins register per
//! bucket key, persisted as a single JSON document and served over HTTP
//! with Axum.
//!
//! | Route                 | Body                         |
//! |-----------------------|------------------------------|
//! | `GET /sync/snapshot`  | `{"records":[...]}`          |
//! | `POST /sync/merge`    | `{"ok":true,"merged":n}`     |
//! | `GET /health`         | `{"ok":true,"keys":n}`       |
//!
//! ## Quick Start
//!
//! ```no_run
//! use bucket_sync_server::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::new("127.0.0.1:8787", "sync-db.json");
//!     serve(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```

#![warn(missing_docs)]

mod api;
pub mod document;
mod merge;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use bucket_sync::wire::{MERGE_PATH, SNAPSHOT_PATH};
use tokio::net::TcpListener;
use tracing::info;

pub use document::{
    DocumentBackend, DocumentError, FileDocument, MemoryDocument, MergeReport, RegisterDocument,
};
pub use merge::MergeStore;

/// Largest accepted merge body. A batch carries every tracked bucket.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The document could not be opened.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Where to listen and where to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8787`.
    pub bind: String,
    /// Path of the register document.
    pub document: PathBuf,
    /// Largest accepted request body in bytes.
    pub body_limit: usize,
}

impl ServerConfig {
    /// Listen on `bind` and persist to `document`.
    pub fn new(bind: impl Into<String>, document: impl Into<PathBuf>) -> Self {
        Self {
            bind: bind.into(),
            document: document.into(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Build the HTTP routes over a merge store.
pub fn router(store: Arc<MergeStore>) -> Router {
    router_with_limit(store, DEFAULT_BODY_LIMIT)
}

fn router_with_limit(store: Arc<MergeStore>, body_limit: usize) -> Router {
    Router::new()
        .route(SNAPSHOT_PATH, get(api::snapshot))
        .route(MERGE_PATH, post(api::merge))
        .route("/health", get(api::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(store)
}

/// Bind `config.bind` and return the listener with its resolved address.
pub async fn bind(config: &ServerConfig) -> Result<(TcpListener, SocketAddr), ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: config.bind.clone(),
        source,
    };
    let listener = TcpListener::bind(&config.bind).await.map_err(bind_error)?;
    let addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, addr))
}

/// Open the document, bind, and serve until `shutdown` resolves.
pub async fn serve<F>(config: ServerConfig, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = Arc::new(MergeStore::new(FileDocument::open(&config.document)?));
    let (listener, addr) = bind(&config).await?;
    info!(
        %addr,
        document = %config.document.display(),
        keys = store.len().await?,
        "sync server listening"
    );

    axum::serve(listener, router_with_limit(store, config.body_limit))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;
    info!("sync server stopped");
    Ok(())
}
