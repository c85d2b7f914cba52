use std::time::Duration;

use async_trait::async_trait;
use bucket_sync::wire::{MERGE_PATH, SNAPSHOT_PATH};
use bucket_sync::{MergeResponse, SnapshotResponse, SyncRecord};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::transport::{Transport, TransportError};

/// JSON-over-HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct MergeBody<'a> {
    records: &'a [SyncRecord],
}

impl HttpTransport {
    /// Create a transport for the server at `base_url`.
    ///
    /// `timeout` bounds each request; a timed-out request counts as a
    /// transport error and is retried on the next tick.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a transport using the request timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, config: &SyncConfig) -> Result<Self, TransportError> {
        Self::new(base_url, config.request_timeout)
    }

    /// Reuse an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Server base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn snapshot(&self) -> Result<Vec<SyncRecord>, TransportError> {
        let response = self.client.get(self.url(SNAPSHOT_PATH)).send().await?;
        let body: SnapshotResponse = check(response)?.json().await?;
        Ok(body.records)
    }

    async fn merge(&self, records: &[SyncRecord]) -> Result<MergeResponse, TransportError> {
        let response = self
            .client
            .post(self.url(MERGE_PATH))
            .json(&MergeBody { records })
            .send()
            .await?;
        let body: MergeResponse = check(response)?.json().await?;
        if !body.ok {
            return Err(TransportError::Rejected);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = HttpTransport::with_client(reqwest::Client::new(), "http://host:1/");
        assert_eq!(t.url(SNAPSHOT_PATH), "http://host:1/sync/snapshot");
        assert_eq!(t.base_url(), "http://host:1");
    }

    #[test]
    fn merge_body_matches_wire_shape() {
        let records = vec![SyncRecord::tombstone("k", 100)];
        let json = serde_json::to_value(MergeBody { records: &records }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"records": [{"key": "k", "ts": 100, "value": null}]})
        );
    }
}
