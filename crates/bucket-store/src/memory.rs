use std::collections::BTreeMap;

use crate::traits::{StateStore, Transactional};

type Namespace = BTreeMap<String, Vec<u8>>;

/// Volatile backend: one sorted map per namespace.
///
/// Clients built on it start empty and rely on the first pull to hydrate.
///
/// ```
/// use bucket_store::{MemoryStore, StateStore};
///
/// let mut store = MemoryStore::new();
/// store.put("buckets", "teams", b"[]").unwrap();
/// assert_eq!(store.list_keys("buckets").unwrap(), vec!["teams"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    namespaces: BTreeMap<String, Namespace>,
}

/// Error type of [`MemoryStore`]. The backend itself never fails; callers
/// use it to abort a transaction.
#[derive(Debug, Clone, thiserror::Error)]
#[error("memory store: {0}")]
pub struct MemoryError(pub String);

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries across all namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    /// `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStore {
    type Error = MemoryError;

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        if let Some(ns) = self.namespaces.get_mut(namespace) {
            ns.remove(key);
            if ns.is_empty() {
                self.namespaces.remove(namespace);
            }
        }
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

impl Transactional for MemoryStore {
    /// Snapshot-and-restore: on error the whole map reverts.
    fn transaction<F, R>(&mut self, f: F) -> Result<R, Self::Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Self::Error>,
    {
        let before = self.namespaces.clone();
        let result = f(self);
        if result.is_err() {
            self.namespaces = before;
        }
        result
    }
}
