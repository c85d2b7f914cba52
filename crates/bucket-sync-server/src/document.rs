//! The persisted register document.
//!
//! The whole key → register map lives in one JSON document:
//!
//! ```json
//! { "records": { "teams": { "ts": 1000, "value": "[\"Reds\"]" } } }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bucket_sync::{RemoteRegister, SyncRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors reading or writing the document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Filesystem failure other than a missing file.
    #[error("document I/O error at {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The blocking document task panicked or was cancelled.
    #[error("document task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of merging one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records that replaced the stored register.
    pub merged: usize,
    /// Keys whose record was older than the stored one.
    pub rejected: Vec<String>,
}

/// The key → register map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDocument {
    /// Registers by bucket name.
    #[serde(default)]
    pub records: BTreeMap<String, RemoteRegister>,
}

impl RegisterDocument {
    /// Fold a batch in, record by record. Partial acceptance is normal.
    pub fn merge(&mut self, records: &[SyncRecord]) -> MergeReport {
        let mut report = MergeReport::default();
        for record in records {
            let accepted = self
                .records
                .entry(record.key.clone())
                .or_default()
                .apply(record);
            if accepted {
                report.merged += 1;
            } else {
                report.rejected.push(record.key.clone());
            }
        }
        report
    }

    /// Every register as a wire record, in key order.
    pub fn snapshot(&self) -> Vec<SyncRecord> {
        self.records
            .iter()
            .map(|(key, register)| register.to_record(key.clone()))
            .collect()
    }

    /// Number of known buckets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` before the first merge.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Where the document lives.
pub trait DocumentBackend: Send + Sync {
    /// Read the document. A missing or corrupt document reads as empty.
    fn load(&self) -> Result<RegisterDocument, DocumentError>;

    /// Replace the document.
    fn save(&self, doc: &RegisterDocument) -> Result<(), DocumentError>;
}

/// Document kept on disk as pretty JSON, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: PathBuf,
}

impl FileDocument {
    /// Use the document at `path`, creating `{"records":{}}` if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let doc = Self { path: path.into() };
        if !doc.path.exists() {
            if let Some(parent) = doc.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| doc.io_error(source))?;
            }
            doc.save(&RegisterDocument::default())?;
        }
        Ok(doc)
    }

    /// Document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> DocumentError {
        DocumentError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl DocumentBackend for FileDocument {
    fn load(&self) -> Result<RegisterDocument, DocumentError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no document yet, starting empty");
                return Ok(RegisterDocument::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt document, resetting to empty");
                Ok(RegisterDocument::default())
            }
        }
    }

    fn save(&self, doc: &RegisterDocument) -> Result<(), DocumentError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            // Contents must be durable before the rename publishes them.
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        write().map_err(|source| self.io_error(source))
    }
}

/// In-memory document for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    doc: Mutex<RegisterDocument>,
}

impl MemoryDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentBackend for MemoryDocument {
    fn load(&self) -> Result<RegisterDocument, DocumentError> {
        Ok(self
            .doc
            .lock()
            .map(|doc| doc.clone())
            .unwrap_or_default())
    }

    fn save(&self, doc: &RegisterDocument) -> Result<(), DocumentError> {
        if let Ok(mut stored) = self.doc.lock() {
            *stored = doc.clone();
        }
        Ok(())
    }
}
