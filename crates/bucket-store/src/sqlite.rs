//! SQLite backend for agents that must survive restarts.
//!
//! One table holds every namespace. The schema version lives in
//! `PRAGMA user_version`; a database written by a newer release is refused
//! rather than silently reinterpreted.
//!
//! ```no_run
//! use bucket_store::{SqliteStore, StateStore};
//!
//! let mut store = SqliteStore::open("client.db").unwrap();
//! store.put("buckets", "teams", b"[]").unwrap();
//! assert_eq!(store.get("buckets", "teams").unwrap().as_deref(), Some(&b"[]"[..]));
//! ```

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::traits::{StateStore, Transactional};

const SCHEMA_VERSION: i64 = 1;

const SAVEPOINT: &str = "bucket_tx";

/// Connection settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Journal mode. Defaults to WAL so `bucket-sync inspect` can read while
    /// an agent writes.
    pub journal_mode: JournalMode,
    /// How long a writer waits for a competing lock. Defaults to 5 seconds.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead log.
    Wal,
    /// Rollback journal.
    Delete,
    /// Journal kept in memory; no crash recovery.
    Memory,
}

impl JournalMode {
    fn pragma(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Errors from the SQLite backend.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// rusqlite failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The file was written by a newer schema.
    #[error("unsupported schema version {found} (expected at most {})", SCHEMA_VERSION)]
    Schema {
        /// `user_version` found on disk.
        found: i64,
    },
}

/// SQLite persistence backend.
///
/// Owns its connection; share it through [`LocalStore`](crate::LocalStore),
/// which serializes access.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open (or create) the database at `path`.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        Self::prepare(Connection::open(path)?, &config)
    }

    /// Open an existing database for reading.
    ///
    /// Nothing is created or migrated: a missing file is an error, and so is
    /// any schema version other than the current one.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        match user_version(&conn)? {
            SCHEMA_VERSION => Ok(Self { conn }),
            found => Err(SqliteError::Schema { found }),
        }
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::prepare(Connection::open_in_memory()?, &SqliteConfig::default())
    }

    fn prepare(conn: Connection, config: &SqliteConfig) -> Result<Self, SqliteError> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", config.journal_mode.pragma(), |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Size of the database file in bytes.
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        let bytes: i64 = self.conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(bytes.max(0) as u64)
    }

    /// Journal mode as reported by SQLite (lower case).
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        Ok(self
            .conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))?)
    }
}

fn user_version(conn: &Connection) -> Result<i64, SqliteError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn migrate(conn: &Connection) -> Result<(), SqliteError> {
    match user_version(conn)? {
        0 => {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    namespace TEXT NOT NULL,
                    key       TEXT NOT NULL,
                    data      BLOB NOT NULL,
                    PRIMARY KEY (namespace, key)
                ) WITHOUT ROWID;",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(SqliteError::Schema { found }),
    }
}

impl StateStore for SqliteStore {
    type Error = SqliteError;

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        self.conn
            .prepare_cached(
                "INSERT INTO kv (namespace, key, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO UPDATE SET data = excluded.data",
            )?
            .execute(params![namespace, key, value])?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self
            .conn
            .prepare_cached("SELECT data FROM kv WHERE namespace = ?1 AND key = ?2")?
            .query_row(params![namespace, key], |row| row.get(0))
            .optional()?)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        self.conn
            .prepare_cached("DELETE FROM kv WHERE namespace = ?1 AND key = ?2")?
            .execute(params![namespace, key])?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

impl Transactional for SqliteStore {
    /// Runs `f` inside a savepoint, so transactions nest.
    fn transaction<F, R>(&mut self, f: F) -> Result<R, Self::Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Self::Error>,
    {
        self.conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
        match f(self) {
            Ok(result) => {
                self.conn.execute_batch(&format!("RELEASE {SAVEPOINT}"))?;
                Ok(result)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalStore, BUCKETS, STAMPS};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_and_delete() {
        let mut s = store();
        s.put(BUCKETS, "teams", b"[]").unwrap();
        s.put(BUCKETS, "teams", b"[1]").unwrap();
        assert_eq!(s.get(BUCKETS, "teams").unwrap(), Some(b"[1]".to_vec()));

        s.delete(BUCKETS, "teams").unwrap();
        assert!(!s.exists(BUCKETS, "teams").unwrap());
    }

    #[test]
    fn namespaces_are_disjoint() {
        let mut s = store();
        s.put(BUCKETS, "b", b"2").unwrap();
        s.put(BUCKETS, "a", b"1").unwrap();
        s.put(STAMPS, "c", b"3").unwrap();

        assert_eq!(s.list_keys(BUCKETS).unwrap(), vec!["a", "b"]);
        assert_eq!(s.list_keys(STAMPS).unwrap(), vec!["c"]);
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let mut s = store();
        s.put(BUCKETS, "teams", b"old").unwrap();

        let result: Result<(), SqliteError> = s.transaction(|s| {
            s.put(BUCKETS, "teams", b"new")?;
            s.put(STAMPS, "teams", b"99")?;
            Err(SqliteError::Schema { found: -1 })
        });

        assert!(result.is_err());
        assert_eq!(s.get(BUCKETS, "teams").unwrap(), Some(b"old".to_vec()));
        assert_eq!(s.get(STAMPS, "teams").unwrap(), None);
    }

    #[test]
    fn nested_transactions_commit_together() {
        let mut s = store();
        s.transaction(|s| {
            s.put(BUCKETS, "a", b"1")?;
            s.transaction(|s| s.put(BUCKETS, "b", b"2"))
        })
        .unwrap();

        assert_eq!(s.list_keys(BUCKETS).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn local_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        {
            let local = LocalStore::new(SqliteStore::open(&path).unwrap());
            local.write("teams", Some(r#"["Reds"]"#)).unwrap();
            local.clear("brackets").unwrap();
        }

        let local = LocalStore::new(SqliteStore::open(&path).unwrap());
        assert_eq!(local.read("teams").unwrap().as_deref(), Some(r#"["Reds"]"#));
        assert_eq!(local.read("brackets").unwrap(), None);
        assert!(local.stamp("brackets").unwrap() > 0);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        drop(SqliteStore::open(&path).unwrap());
        Connection::open(&path)
            .unwrap()
            .pragma_update(None, "user_version", 7)
            .unwrap();

        let err = SqliteStore::open(&path).err().unwrap();
        assert!(matches!(err, SqliteError::Schema { found: 7 }));
    }

    #[test]
    fn read_only_open_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        assert!(SqliteStore::open_read_only(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn read_only_open_sees_written_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        LocalStore::new(SqliteStore::open(&path).unwrap())
            .write("teams", Some("[]"))
            .unwrap();

        let local = LocalStore::new(SqliteStore::open_read_only(&path).unwrap());
        assert_eq!(local.read("teams").unwrap().as_deref(), Some("[]"));
        assert!(local.write("teams", Some("[1]")).is_err());
    }

    #[test]
    fn file_stats() {
        let dir = tempfile::tempdir().unwrap();
        let s = SqliteStore::open(dir.path().join("client.db")).unwrap();
        assert!(s.file_size().unwrap() > 0);
        assert_eq!(s.journal_mode().unwrap(), "wal");
    }
}
