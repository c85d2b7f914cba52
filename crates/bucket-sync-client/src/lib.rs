//! # bucket-sync-client
//!
//! The client-side sync engine. It mirrors the buckets of a
//! [`LocalStore`](bucket_store::LocalStore) to a merge server with two
//! independent agents:
//!
//! - the **push agent** sends every tracked bucket, stamped with its dirty
//!   clock, on a fixed interval and right after each local write;
//! - the **pull agent** fetches the full remote snapshot on a fixed interval
//!   (or on reconnect) and applies records that are newer than local state
//!   and not inside the protection window of a recent local write.
//!
//! Pushing is gated on *hydration*: nothing is sent before the first
//! successful pull, so an empty client can never wipe a populated server.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bucket_store::{LocalStore, MemoryStore};
//! use bucket_sync_client::{HttpTransport, SyncConfig, SyncEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LocalStore::new(MemoryStore::new()));
//! let transport = HttpTransport::new("http://127.0.0.1:8787", Duration::from_secs(10))?;
//! let config = SyncConfig::default().with_buckets(["teams", "brackets"]);
//!
//! let engine = SyncEngine::new(store.clone(), transport, config);
//! engine.start();
//!
//! store.write("teams", Some(r#"["Reds"]"#))?;
//! // ... later
//! engine.stop();
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod flight;
mod http;
pub mod pull;
pub mod push;
mod transport;

pub use config::{SyncConfig, MIN_INTERVAL};
pub use engine::{EngineStatus, SyncEngine};
pub use http::HttpTransport;
pub use pull::{PullOutcome, PullReport};
pub use push::PushOutcome;
pub use transport::{Transport, TransportError};
