//! The local key store and its dirty clock.
//!
//! Bucket values live in the [`BUCKETS`] namespace of the backend; the
//! last-local-write stamp of each bucket lives in [`STAMPS`]. Every mutation
//! touches both inside one backend transaction, so a push can never observe
//! fresh data paired with a stale stamp.

use std::sync::{Arc, Mutex, MutexGuard};

use bucket_sync::{SyncRecord, SystemClock, TimeSource};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::traits::{StateStore, Transactional};

/// Namespace holding bucket values.
pub const BUCKETS: &str = "buckets";

/// Namespace holding the dirty clock.
pub const STAMPS: &str = "stamps";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification broadcast to consumers and to the push agent.
///
/// Events carry no bucket contents: receivers re-read the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A consumer wrote `key` locally.
    Local {
        /// The bucket that changed.
        key: String,
    },
    /// A pull cycle applied `applied` remote buckets.
    Remote {
        /// Number of buckets overwritten or cleared.
        applied: usize,
    },
}

/// Errors from the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The backend mutex was poisoned by a panicking writer.
    #[error("local store lock poisoned")]
    LockPoisoned,
    /// A value could not be serialized.
    #[error("failed to serialize bucket {key}: {source}")]
    Serialize {
        /// Bucket being written.
        key: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl StoreError {
    fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Backend(Box::new(e))
    }
}

/// Summary of one bucket, for inspection tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name.
    pub key: String,
    /// Serialized size, `None` when the bucket is cleared.
    pub size: Option<usize>,
    /// Dirty clock stamp (0 if never written).
    pub ts: u64,
}

/// Local key store with a dirty clock.
///
/// Cheap to share: wrap it in an `Arc` and hand it to consumers and to the
/// sync engine. All operations are synchronous; the backend lock is never
/// held across an `.await`.
pub struct LocalStore<S> {
    backend: Mutex<S>,
    clock: Arc<dyn TimeSource>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl<S> LocalStore<S>
where
    S: StateStore + Transactional,
{
    /// Wrap a backend, stamping writes with the system clock.
    pub fn new(backend: S) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Wrap a backend with a custom time source.
    pub fn with_clock(backend: S, clock: Arc<dyn TimeSource>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            backend: Mutex::new(backend),
            clock,
            changes,
        }
    }

    /// The time source used for stamps.
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>, StoreError> {
        self.backend.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Write a bucket (or clear it with `None`) and stamp the dirty clock.
    ///
    /// Returns the stamp. Emits [`ChangeEvent::Local`] after the write is
    /// durable.
    pub fn write(&self, key: &str, value: Option<&str>) -> Result<u64, StoreError> {
        let ts = self.now_ms();
        {
            let mut backend = self.lock()?;
            backend
                .transaction(|s| put_bucket(s, key, value, ts))
                .map_err(StoreError::backend)?;
        }
        debug!(key, ts, cleared = value.is_none(), "local write");
        self.notify(ChangeEvent::Local {
            key: key.to_string(),
        });
        Ok(ts)
    }

    /// Serialize `value` as JSON and [`write`](Self::write) it.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<u64, StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.write(key, Some(&raw))
    }

    /// Clear a bucket. The tombstone is stamped like any other write.
    pub fn clear(&self, key: &str) -> Result<u64, StoreError> {
        self.write(key, None)
    }

    /// Raw serialized value of a bucket.
    pub fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let backend = self.lock()?;
        let raw = backend.get(BUCKETS, key).map_err(StoreError::backend)?;
        Ok(raw.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Raw value of a bucket, or `default` when absent or unreadable.
    pub fn read_or(&self, key: &str, default: &str) -> String {
        match self.read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                warn!(key, error = %e, "failed to read bucket, using default");
                default.to_string()
            }
        }
    }

    /// Deserialize a bucket. Corrupt or missing data reads as `None`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.read(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "failed to read bucket");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "bucket holds invalid JSON");
                None
            }
        }
    }

    /// Dirty clock stamp for `key`, 0 if it was never written.
    pub fn stamp(&self, key: &str) -> Result<u64, StoreError> {
        let backend = self.lock()?;
        read_stamp(&*backend, key)
    }

    /// Every key that has a value or a stamp, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let backend = self.lock()?;
        let mut keys = backend.list_keys(BUCKETS).map_err(StoreError::backend)?;
        keys.extend(backend.list_keys(STAMPS).map_err(StoreError::backend)?);
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Size and stamp of every known bucket.
    pub fn entries(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let keys = self.keys()?;
        let backend = self.lock()?;
        keys.into_iter()
            .map(|key| {
                let size = backend
                    .get(BUCKETS, &key)
                    .map_err(StoreError::backend)?
                    .map(|v| v.len());
                let ts = read_stamp(&*backend, &key)?;
                Ok(BucketInfo { key, size, ts })
            })
            .collect()
    }

    /// Snapshot a bucket as a wire record: its stamp and current value.
    pub fn record(&self, key: &str) -> Result<SyncRecord, StoreError> {
        let backend = self.lock()?;
        let ts = read_stamp(&*backend, key)?;
        let value = backend
            .get(BUCKETS, key)
            .map_err(StoreError::backend)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        Ok(SyncRecord::new(key, ts, value))
    }

    /// Replace a bucket's value without touching its stamp or notifying.
    ///
    /// Used when the outbound payload was normalized: the stripped form
    /// becomes canonical locally as well. Nothing is written if the bucket
    /// was re-stamped since `expected_ts` was read.
    pub fn replace_value(
        &self,
        key: &str,
        expected_ts: u64,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut backend = self.lock()?;
        if read_stamp(&*backend, key)? != expected_ts {
            return Ok(false);
        }
        backend
            .put(BUCKETS, key, value.as_bytes())
            .map_err(StoreError::backend)?;
        Ok(true)
    }

    /// Apply a remote record if `accept(local_ts)` says so.
    ///
    /// The stamp read, the decision and the write happen under one lock, so
    /// a concurrent local write cannot slip in between. On acceptance the
    /// value is overwritten (or cleared) and the stamp set to `record.ts`.
    /// No change event is emitted; the caller aggregates.
    pub fn apply_if<F>(&self, record: &SyncRecord, accept: F) -> Result<bool, StoreError>
    where
        F: FnOnce(u64) -> bool,
    {
        let mut backend = self.lock()?;
        let local_ts = read_stamp(&*backend, &record.key)?;
        if !accept(local_ts) {
            return Ok(false);
        }
        backend
            .transaction(|s| put_bucket(s, &record.key, record.value.as_deref(), record.ts))
            .map_err(StoreError::backend)?;
        Ok(true)
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Broadcast a change. Having no subscribers is fine.
    pub fn notify(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

fn put_bucket<S: StateStore>(
    store: &mut S,
    key: &str,
    value: Option<&str>,
    ts: u64,
) -> Result<(), S::Error> {
    match value {
        Some(value) => store.put(BUCKETS, key, value.as_bytes())?,
        None => store.delete(BUCKETS, key)?,
    }
    store.put(STAMPS, key, ts.to_string().as_bytes())
}

fn read_stamp<S: StateStore>(store: &S, key: &str) -> Result<u64, StoreError> {
    let raw = store.get(STAMPS, key).map_err(StoreError::backend)?;
    Ok(raw
        .and_then(|bytes| std::str::from_utf8(&bytes).ok()?.parse().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use bucket_sync::ManualClock;
    use serde::Deserialize;

    fn store_at(ms: u64) -> (LocalStore<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(ms);
        let store = LocalStore::with_clock(MemoryStore::new(), Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn write_stamps_clock() {
        let (store, clock) = store_at(1000);
        assert_eq!(store.write("teams", Some("[]")).unwrap(), 1000);
        assert_eq!(store.stamp("teams").unwrap(), 1000);

        clock.advance(20);
        store.write("teams", Some("[1]")).unwrap();
        assert_eq!(store.stamp("teams").unwrap(), 1020);
        assert_eq!(store.read("teams").unwrap().as_deref(), Some("[1]"));
    }

    #[test]
    fn unknown_key_has_zero_stamp_and_default() {
        let (store, _) = store_at(1);
        assert_eq!(store.stamp("nope").unwrap(), 0);
        assert_eq!(store.read_or("nope", "{}"), "{}");
        assert!(store.read_json::<Vec<u32>>("nope").is_none());
    }

    #[test]
    fn clear_removes_value_but_keeps_stamp() {
        let (store, clock) = store_at(10);
        store.write("k", Some("1")).unwrap();
        clock.advance(5);
        store.clear("k").unwrap();

        assert_eq!(store.read("k").unwrap(), None);
        assert_eq!(store.stamp("k").unwrap(), 15);
        assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);
        assert_eq!(store.record("k").unwrap(), SyncRecord::tombstone("k", 15));
    }

    #[test]
    fn write_emits_local_change() {
        let (store, _) = store_at(1);
        let mut rx = store.subscribe();
        store.write("teams", Some("[]")).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ChangeEvent::Local {
                key: "teams".into()
            }
        );
    }

    #[test]
    fn json_helpers_round_trip_and_fail_open() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Team {
            name: String,
        }

        let (store, _) = store_at(1);
        store
            .write_json("team", &Team { name: "Reds".into() })
            .unwrap();
        assert_eq!(
            store.read_json::<Team>("team"),
            Some(Team { name: "Reds".into() })
        );

        store.write("broken", Some("{not json")).unwrap();
        assert!(store.read_json::<Team>("broken").is_none());
    }

    #[test]
    fn apply_if_sets_value_and_remote_stamp_silently() {
        let (store, _) = store_at(5000);
        let mut rx = store.subscribe();

        let applied = store
            .apply_if(&SyncRecord::new("teams", 1000, Some("[9]".into())), |local| {
                local == 0
            })
            .unwrap();

        assert!(applied);
        assert_eq!(store.stamp("teams").unwrap(), 1000);
        assert_eq!(store.read("teams").unwrap().as_deref(), Some("[9]"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn apply_if_rejection_leaves_store_untouched() {
        let (store, _) = store_at(5000);
        store.write("k", Some("mine")).unwrap();

        let applied = store
            .apply_if(&SyncRecord::tombstone("k", 9000), |_| false)
            .unwrap();

        assert!(!applied);
        assert_eq!(store.read("k").unwrap().as_deref(), Some("mine"));
        assert_eq!(store.stamp("k").unwrap(), 5000);
    }

    #[test]
    fn replace_value_keeps_stamp() {
        let (store, clock) = store_at(100);
        store.write("k", Some("big")).unwrap();
        clock.advance(50);
        assert!(store.replace_value("k", 100, "small").unwrap());

        assert_eq!(store.stamp("k").unwrap(), 100);
        assert_eq!(store.read("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn replace_value_skips_restamped_bucket() {
        let (store, clock) = store_at(100);
        store.write("k", Some("big")).unwrap();
        clock.advance(50);
        store.write("k", Some("newer")).unwrap();

        assert!(!store.replace_value("k", 100, "small").unwrap());
        assert_eq!(store.read("k").unwrap().as_deref(), Some("newer"));
    }

    #[test]
    fn entries_report_size_and_stamp() {
        let (store, _) = store_at(7);
        store.write("a", Some("12345")).unwrap();
        store.clear("b").unwrap();

        assert_eq!(
            store.entries().unwrap(),
            vec![
                BucketInfo {
                    key: "a".into(),
                    size: Some(5),
                    ts: 7
                },
                BucketInfo {
                    key: "b".into(),
                    size: None,
                    ts: 7
                },
            ]
        );
    }
}
