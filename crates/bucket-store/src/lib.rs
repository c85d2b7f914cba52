//! # bucket-store
//!
//! The client-side half of [`bucket-sync`](https://docs.rs/bucket-sync):
//! a local key store holding the current value of every bucket, plus the
//! *dirty clock* recording when each bucket was last written locally.
//!
//! Consumers only ever write through [`LocalStore::write`], which stores
//! the value and stamps the clock in one step, then broadcasts a
//! [`ChangeEvent`].
//!
//! ## Quick Start
//!
//! ```
//! use bucket_store::{LocalStore, MemoryStore};
//!
//! let store = LocalStore::new(MemoryStore::new());
//! let stamp = store.write("teams", Some(r#"["Reds","Blues"]"#)).unwrap();
//!
//! assert_eq!(store.stamp("teams").unwrap(), stamp);
//! assert_eq!(store.read_or("teams", "[]"), r#"["Reds","Blues"]"#);
//! assert_eq!(store.read_or("brackets", "[]"), "[]");
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, ephemeral clients |
//! | `SqliteStore` | `sqlite` | Desktop and CLI agents |

mod local;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use local::{BucketInfo, ChangeEvent, LocalStore, StoreError, BUCKETS, STAMPS};
pub use memory::{MemoryError, MemoryStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore};
pub use traits::*;
