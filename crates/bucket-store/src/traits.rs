/// Core trait for local persistence.
///
/// Every backend implements simple key-value operations scoped by a
/// namespace (analogous to a table). Data is opaque bytes: the store does
/// not interpret bucket contents.
pub trait StateStore {
    /// Error type for this backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store a value under `(namespace, key)`.
    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Retrieve a value by `(namespace, key)`.
    /// Returns `None` if the key does not exist.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Delete a value by `(namespace, key)`. Deleting a missing key is a no-op.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error>;

    /// List all keys in a namespace, sorted.
    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error>;

    /// Check if a key exists in a namespace.
    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Self::Error> {
        Ok(self.get(namespace, key)?.is_some())
    }
}

/// Extension trait for backends that support atomic transactions.
pub trait Transactional: StateStore {
    /// Execute a closure within an atomic transaction.
    /// If the closure returns `Err`, all changes are rolled back.
    fn transaction<F, R>(&mut self, f: F) -> Result<R, Self::Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Self::Error>;
}
