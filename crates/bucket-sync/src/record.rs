//! The wire unit shared by snapshot reads and merge writes.

use serde::{Deserialize, Serialize};

/// One bucket as it travels between client and server.
///
/// `value` is the bucket's serialized JSON document, or `None` for a
/// tombstone. `ts` is the writer's wall-clock stamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Bucket name.
    pub key: String,
    /// Last-write stamp.
    pub ts: u64,
    /// Serialized document, `None` when cleared.
    pub value: Option<String>,
}

impl SyncRecord {
    /// Build a record.
    pub fn new(key: impl Into<String>, ts: u64, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            ts,
            value,
        }
    }

    /// A cleared bucket.
    pub fn tombstone(key: impl Into<String>, ts: u64) -> Self {
        Self::new(key, ts, None)
    }

    /// `true` if this record clears its bucket.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_serializes_null_value() {
        let json = serde_json::to_string(&SyncRecord::tombstone("k", 100)).unwrap();
        assert_eq!(json, r#"{"key":"k","ts":100,"value":null}"#);
    }

    #[test]
    fn missing_value_field_reads_as_tombstone() {
        let record: SyncRecord = serde_json::from_str(r#"{"key":"k","ts":3}"#).unwrap();
        assert!(record.is_tombstone());
    }

    #[test]
    fn negative_stamp_is_rejected() {
        let parsed = serde_json::from_str::<SyncRecord>(r#"{"key":"k","ts":-1,"value":null}"#);
        assert!(parsed.is_err());
    }
}
