use std::sync::Arc;

use bucket_sync::SyncRecord;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{DocumentBackend, DocumentError, MergeReport};

/// The authoritative register map.
///
/// Every merge is a read-modify-write of the whole document, held under one
/// async lock so concurrent batches from different clients cannot lose each
/// other's updates. Document I/O runs on the blocking pool.
pub struct MergeStore {
    backend: Arc<dyn DocumentBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl MergeStore {
    /// Serve registers from `backend`.
    pub fn new(backend: impl DocumentBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Every register, in key order.
    pub async fn snapshot(&self) -> Result<Vec<SyncRecord>, DocumentError> {
        self.blocking(|backend| Ok(backend.load()?.snapshot())).await
    }

    /// Number of known buckets.
    pub async fn len(&self) -> Result<usize, DocumentError> {
        self.blocking(|backend| Ok(backend.load()?.len())).await
    }

    /// Apply a batch with LWW per key and persist the result.
    ///
    /// The document is only rewritten when at least one record was accepted.
    pub async fn merge(&self, records: Vec<SyncRecord>) -> Result<MergeReport, DocumentError> {
        // Owned guard: the write finishes under the lock even if the caller
        // is dropped mid-merge.
        let guard = self.write_lock.clone().lock_owned().await;
        let received = records.len();

        let report = self
            .blocking(move |backend| {
                let mut doc = backend.load()?;
                let report = doc.merge(&records);
                if report.merged > 0 {
                    backend.save(&doc)?;
                }
                drop(guard);
                Ok(report)
            })
            .await?;

        for key in &report.rejected {
            debug!(%key, "rejected stale record");
        }
        info!(
            received,
            merged = report.merged,
            rejected = report.rejected.len(),
            "merged batch"
        );
        Ok(report)
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R, DocumentError>
    where
        F: FnOnce(&dyn DocumentBackend) -> Result<R, DocumentError> + Send + 'static,
        R: Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || f(backend.as_ref())).await?
    }
}
