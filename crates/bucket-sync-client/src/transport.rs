use std::sync::Arc;

use async_trait::async_trait;
use bucket_sync::{MergeResponse, SyncRecord};

/// Errors from talking to the merge server.
///
/// None of these are fatal: the agents log them and try again on the next
/// tick.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection, timeout or body decoding failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server answered {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The server accepted the request but reported failure.
    #[error("server rejected merge")]
    Rejected,
    /// Any other transport-level failure.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// The two calls the engine makes against the merge server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetch every known bucket.
    async fn snapshot(&self) -> Result<Vec<SyncRecord>, TransportError>;

    /// Send one full batch of tracked buckets.
    async fn merge(&self, records: &[SyncRecord]) -> Result<MergeResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn snapshot(&self) -> Result<Vec<SyncRecord>, TransportError> {
        (**self).snapshot().await
    }

    async fn merge(&self, records: &[SyncRecord]) -> Result<MergeResponse, TransportError> {
        (**self).merge(records).await
    }
}
