use serde::{Deserialize, Serialize};

use crate::record::SyncRecord;

/// The server-held last-writer-wins register for one bucket.
///
/// Unlike a symmetric LWW register there is no actor tiebreak: an incoming
/// write with a stamp *greater than or equal to* the stored one replaces it.
/// Registers are created lazily on first merge, overwritten in place and
/// never removed; clearing a bucket stores `value = None` with a newer `ts`.
///
/// # Example
///
/// ```
/// use bucket_sync::{RemoteRegister, SyncRecord};
///
/// let mut r = RemoteRegister::default();
/// r.apply(&SyncRecord::new("k", 2, Some("\"new\"".into())));
/// r.apply(&SyncRecord::new("k", 1, Some("\"old\"".into())));
/// assert_eq!(r.ts, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegister {
    /// Stamp of the accepted write, 0 for a register never written.
    pub ts: u64,
    /// Accepted value, `None` for a tombstone.
    pub value: Option<String>,
}

impl RemoteRegister {
    /// Create a register holding `value` at `ts`.
    pub fn new(ts: u64, value: Option<String>) -> Self {
        Self { ts, value }
    }

    /// Would a write stamped `ts` be accepted?
    #[must_use]
    pub fn accepts(&self, ts: u64) -> bool {
        ts >= self.ts
    }

    /// Fold an incoming record into the register.
    ///
    /// Returns `true` if the record replaced the stored value. A stale
    /// record is silently ignored; that is not an error.
    pub fn apply(&mut self, record: &SyncRecord) -> bool {
        if !self.accepts(record.ts) {
            return false;
        }
        self.ts = record.ts;
        self.value = record.value.clone();
        true
    }

    /// Turn the register back into a wire record for `key`.
    pub fn to_record(&self, key: impl Into<String>) -> SyncRecord {
        SyncRecord::new(key, self.ts, self.value.clone())
    }
}
