//! Wall-clock time sources for write stamps.
//!
//! Write stamps are plain milliseconds since the Unix epoch. They are not
//! vector clocks: two devices writing in the same millisecond collide, and
//! the merge rule ("incoming >= existing wins") settles it.
//!
//! # Example
//!
//! ```
//! use bucket_sync::clock::{ManualClock, TimeSource};
//!
//! let clock = ManualClock::new(1000);
//! assert_eq!(clock.now_ms(), 1000);
//!
//! clock.advance(250);
//! assert_eq!(clock.now_ms(), 1250);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of wall-clock milliseconds.
///
/// The engine and the local store stamp every write with
/// [`now_ms`](TimeSource::now_ms). Tests swap in a [`ManualClock`] to make
/// protection-window decisions deterministic.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A manually driven clock.
///
/// Clones share the same underlying counter, so a test can hand one clone
/// to a store and keep another to move time forward.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `ms`.
    pub fn new(ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(ms)),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
