//! The pull agent: fold the remote snapshot into local state.
//!
//! Per record, with `local` the dirty clock stamp of the bucket:
//!
//! ```text
//! local > 0 && now - local < window && remote >= local   -> Protected (skip)
//! remote <= local                                        -> Stale     (skip)
//! otherwise                                              -> Apply
//! ```
//!
//! The protection window shields a fresh local write from a nominally newer
//! remote value, covering clock skew and the round-trip race where the
//! server snapshot was taken before our own push landed.

use bucket_store::{ChangeEvent, LocalStore, StateStore, Transactional};
use bucket_sync::SyncRecord;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::Shared;
use crate::transport::Transport;

/// What to do with one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Overwrite local state with the remote record.
    Apply,
    /// A recent local write shields the bucket.
    Protected,
    /// The remote record is not newer than local state.
    Stale,
}

/// Decide the fate of a remote record.
pub fn decide(local_ts: u64, remote_ts: u64, now_ms: u64, window_ms: u64) -> Decision {
    if local_ts > 0 && now_ms.saturating_sub(local_ts) < window_ms && remote_ts >= local_ts {
        Decision::Protected
    } else if remote_ts <= local_ts {
        Decision::Stale
    } else {
        Decision::Apply
    }
}

/// Tally of one pull cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Buckets overwritten or cleared.
    pub applied: usize,
    /// Records skipped by the protection window.
    pub protected: usize,
    /// Records not newer than local state.
    pub stale: usize,
    /// Records for buckets this engine does not track.
    pub untracked: usize,
    /// Records the local store failed to apply.
    pub failed: usize,
}

/// Result of one pull attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The snapshot was fetched and reconciled.
    Completed(PullReport),
    /// Another pull is outstanding; this trigger was dropped.
    InFlight,
    /// The engine was stopped; any fetched snapshot was discarded.
    Stopped,
    /// The snapshot could not be fetched.
    Failed,
}

/// Apply a fetched snapshot to the local store.
///
/// Emits nothing; the caller sends the single aggregate notification.
pub fn reconcile<S>(store: &LocalStore<S>, records: &[SyncRecord], config: &SyncConfig) -> PullReport
where
    S: StateStore + Transactional,
{
    let now = store.now_ms();
    let window = config.protection_window_ms();
    let mut report = PullReport::default();

    for record in records {
        if !config.tracks(&record.key) {
            report.untracked += 1;
            continue;
        }

        let mut decision = Decision::Stale;
        let applied = store.apply_if(record, |local_ts| {
            decision = decide(local_ts, record.ts, now, window);
            decision == Decision::Apply
        });

        match (applied, decision) {
            (Ok(true), _) => {
                debug!(key = %record.key, ts = record.ts, cleared = record.is_tombstone(), "applied remote bucket");
                report.applied += 1;
            }
            (Ok(false), Decision::Protected) => {
                debug!(key = %record.key, ts = record.ts, "recent local write protects bucket");
                report.protected += 1;
            }
            (Ok(false), _) => report.stale += 1,
            (Err(e), _) => {
                warn!(key = %record.key, error = %e, "failed to apply remote bucket");
                report.failed += 1;
            }
        }
    }

    report
}

pub(crate) async fn pull_once<S, T>(shared: &Shared<S, T>) -> PullOutcome
where
    S: StateStore + Transactional,
    T: Transport,
{
    let run = shared.run();
    if shared.is_stopped() {
        return PullOutcome::Stopped;
    }
    let Some(_flight) = shared.pull_flight.try_begin() else {
        debug!("pull already in flight, dropping trigger");
        return PullOutcome::InFlight;
    };

    let records = match shared.transport.snapshot().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "snapshot fetch failed, retrying next tick");
            return PullOutcome::Failed;
        }
    };

    if shared.is_superseded(run) {
        debug!("engine stopped during pull, discarding snapshot");
        return PullOutcome::Stopped;
    }

    let report = reconcile(&shared.store, &records, &shared.config);
    shared.mark_pulled();

    if report.applied > 0 {
        info!(
            applied = report.applied,
            protected = report.protected,
            "pulled remote changes"
        );
        shared.store.notify(ChangeEvent::Remote {
            applied: report.applied,
        });
    }

    PullOutcome::Completed(report)
}
