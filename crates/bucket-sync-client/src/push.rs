//! The push agent: replicate every tracked bucket upstream.
//!
//! Each push is a complete snapshot of the tracked buckets keyed by their
//! dirty clock stamps, never a delta. Resending it is harmless, which is why
//! failures are not queued or retried with backoff: the next tick simply
//! sends the current state again.

use bucket_store::{LocalStore, StateStore, StoreError, Transactional};
use bucket_sync::{normalize, Normalized, SyncRecord};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::Shared;
use crate::transport::Transport;

/// Result of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The batch was accepted by the server.
    Sent {
        /// Records sent.
        records: usize,
        /// Records that replaced a server register.
        merged: usize,
    },
    /// Nothing is tracked yet.
    Empty,
    /// No pull has completed yet; the push is deferred.
    NotHydrated,
    /// Another push is outstanding; this trigger was dropped.
    InFlight,
    /// The engine was stopped.
    Stopped,
    /// The batch could not be built or sent.
    Failed,
}

/// Build one record per tracked bucket.
///
/// Buckets whose serialized value reaches the payload limit are normalized,
/// and the stripped value is written back to the store without re-stamping.
pub fn build_batch<S>(store: &LocalStore<S>, config: &SyncConfig) -> Result<Vec<SyncRecord>, StoreError>
where
    S: StateStore + Transactional,
{
    let keys = if config.buckets.is_empty() {
        store.keys()?
    } else {
        config.buckets.clone()
    };

    let mut batch = Vec::with_capacity(keys.len());
    for key in keys {
        let mut record = store.record(&key)?;
        let stripped = record.value.as_deref().and_then(|raw| {
            match normalize(raw, config.payload_limit) {
                Normalized::Stripped { value, removed } => Some((raw.len(), value, removed)),
                Normalized::Unchanged => None,
            }
        });
        if let Some((before, value, removed)) = stripped {
            info!(
                key = %key,
                before,
                after = value.len(),
                removed,
                "normalized oversized bucket"
            );
            store.replace_value(&key, record.ts, &value)?;
            record.value = Some(value);
        }
        batch.push(record);
    }
    Ok(batch)
}

pub(crate) async fn push_once<S, T>(shared: &Shared<S, T>) -> PushOutcome
where
    S: StateStore + Transactional,
    T: Transport,
{
    let run = shared.run();
    if shared.is_stopped() {
        return PushOutcome::Stopped;
    }
    if !shared.is_hydrated() {
        debug!("push deferred until first pull completes");
        return PushOutcome::NotHydrated;
    }
    let Some(_flight) = shared.push_flight.try_begin() else {
        debug!("push already in flight, dropping trigger");
        return PushOutcome::InFlight;
    };

    let batch = match build_batch(&shared.store, &shared.config) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "failed to read local buckets for push");
            return PushOutcome::Failed;
        }
    };
    if batch.is_empty() {
        return PushOutcome::Empty;
    }

    let result = shared.transport.merge(&batch).await;
    if shared.is_superseded(run) {
        debug!("engine stopped during push, ignoring response");
        return PushOutcome::Stopped;
    }
    match result {
        Ok(response) => {
            shared.mark_pushed();
            debug!(records = batch.len(), merged = response.merged, "pushed buckets");
            PushOutcome::Sent {
                records: batch.len(),
                merged: response.merged,
            }
        }
        Err(e) => {
            warn!(error = %e, records = batch.len(), "push failed, retrying next tick");
            PushOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bucket_store::MemoryStore;
    use bucket_sync::ManualClock;
    use serde_json::json;

    use super::*;

    fn store_at(ms: u64) -> (LocalStore<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(ms);
        (
            LocalStore::with_clock(MemoryStore::new(), Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn tracked_but_never_written_bucket_ships_as_zero_stamped_null() {
        let (store, _) = store_at(1000);
        store.write("teams", Some("[]")).unwrap();
        let config = SyncConfig::default().with_buckets(["teams", "brackets"]);

        let batch = build_batch(&store, &config).unwrap();

        assert_eq!(
            batch,
            vec![
                SyncRecord::new("teams", 1000, Some("[]".into())),
                SyncRecord::new("brackets", 0, None),
            ]
        );
    }

    #[test]
    fn untracked_config_ships_every_known_bucket() {
        let (store, clock) = store_at(10);
        store.write("b", Some("2")).unwrap();
        clock.advance(1);
        store.clear("a").unwrap();

        let batch = build_batch(&store, &SyncConfig::default()).unwrap();

        assert_eq!(
            batch,
            vec![SyncRecord::tombstone("a", 11), SyncRecord::new("b", 10, Some("2".into()))]
        );
    }

    #[test]
    fn oversized_bucket_is_normalized_and_written_back() {
        let (store, clock) = store_at(500);
        let blob = format!("data:image/png;base64,{}", "Q".repeat(4096));
        let raw = json!({"logo": blob, "name": "Reds"}).to_string();
        store.write("team", Some(&raw)).unwrap();
        clock.advance(10);

        let config = SyncConfig {
            payload_limit: 1024,
            ..SyncConfig::default()
        };
        let batch = build_batch(&store, &config).unwrap();

        let sent = batch[0].value.as_deref().unwrap();
        assert!(sent.len() < 1024);
        assert_eq!(batch[0].ts, 500);
        assert_eq!(store.read("team").unwrap().as_deref(), Some(sent));
        assert_eq!(store.stamp("team").unwrap(), 500);
    }
}
