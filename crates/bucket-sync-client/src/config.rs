use std::time::Duration;

use bucket_sync::DEFAULT_PAYLOAD_LIMIT;
use tracing::warn;

/// Shortest agent tick an engine will run with.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Policy knobs of a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Buckets to replicate. Empty means every bucket the local store knows
    /// about (for pushes) and every bucket the server returns (for pulls).
    pub buckets: Vec<String>,
    /// Push tick. Defaults to 3 seconds.
    pub push_interval: Duration,
    /// Pull tick. Defaults to 5 seconds.
    pub pull_interval: Duration,
    /// How long a local write is shielded from remote overwrites.
    /// Defaults to 2 minutes.
    pub protection_window: Duration,
    /// Serialized size at which outbound buckets are normalized.
    pub payload_limit: usize,
    /// Bound on each snapshot or merge request. Defaults to 10 seconds.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            push_interval: Duration::from_secs(3),
            pull_interval: Duration::from_secs(5),
            protection_window: Duration::from_secs(120),
            payload_limit: DEFAULT_PAYLOAD_LIMIT,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Track an explicit set of buckets.
    pub fn with_buckets<I, K>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.buckets = buckets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the protection window.
    pub fn with_protection_window(mut self, window: Duration) -> Self {
        self.protection_window = window;
        self
    }

    /// Set both agent intervals.
    pub fn with_intervals(mut self, push: Duration, pull: Duration) -> Self {
        self.push_interval = push;
        self.pull_interval = pull;
        self
    }

    /// Is `key` replicated by this engine?
    pub fn tracks(&self, key: &str) -> bool {
        self.buckets.is_empty() || self.buckets.iter().any(|b| b == key)
    }

    /// Raise zero intervals to [`MIN_INTERVAL`]; a timer cannot tick at
    /// period zero.
    pub(crate) fn clamp_intervals(mut self) -> Self {
        for (name, interval) in [
            ("push_interval", &mut self.push_interval),
            ("pull_interval", &mut self.pull_interval),
        ] {
            if interval.is_zero() {
                warn!(interval = name, min = ?MIN_INTERVAL, "zero agent interval raised to minimum");
                *interval = MIN_INTERVAL;
            }
        }
        self
    }

    pub(crate) fn protection_window_ms(&self) -> u64 {
        self.protection_window.as_millis() as u64
    }
}
