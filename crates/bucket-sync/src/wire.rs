//! Request and response bodies of the sync HTTP protocol.
//!
//! ```text
//! GET  /sync/snapshot                      -> 200 {"records":[{key,ts,value}...]}
//! POST /sync/merge  {"records":[...]}      -> 200 {"ok":true,"merged":n}
//! ```

use serde::{Deserialize, Serialize};

use crate::record::SyncRecord;

/// Path of the full-snapshot endpoint.
pub const SNAPSHOT_PATH: &str = "/sync/snapshot";

/// Path of the batch merge endpoint.
pub const MERGE_PATH: &str = "/sync/merge";

/// Body of `GET /sync/snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// Every known bucket.
    pub records: Vec<SyncRecord>,
}

/// Body of `POST /sync/merge`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Full batch of tracked buckets.
    pub records: Vec<SyncRecord>,
}

/// Response of `POST /sync/merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResponse {
    /// Always `true` on a 200.
    pub ok: bool,
    /// Number of records that replaced the stored register.
    pub merged: usize,
}

impl MergeResponse {
    /// Successful merge of `merged` records.
    pub fn merged(merged: usize) -> Self {
        Self { ok: true, merged }
    }
}
