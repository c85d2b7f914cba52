//! # bucket-sync
//!
//! Core building blocks for mirroring named state buckets between a
//! local-first client and an authoritative merge server.
//!
//! A *bucket* is a named unit of application state holding one serialized
//! JSON document, or a tombstone (`None`) once it has been cleared. Buckets
//! are replicated as indivisible wholes: there is no field-level merge.
//! Conflicts are resolved per key with last-write-wins timestamps.
//!
//! ## Quick Start
//!
//! ```
//! use bucket_sync::{RemoteRegister, SyncRecord};
//!
//! let mut register = RemoteRegister::default();
//!
//! // Newer-or-equal records win, older ones are ignored.
//! assert!(register.apply(&SyncRecord::new("teams", 1000, Some("[]".into()))));
//! assert!(!register.apply(&SyncRecord::new("teams", 900, None)));
//! assert_eq!(register.value.as_deref(), Some("[]"));
//! ```
//!
//! ## Modules
//!
//! - [`record`] - the [`SyncRecord`] wire unit
//! - [`register`] - the server-side [`RemoteRegister`] (LWW, `>=` wins)
//! - [`clock`] - wall-clock [`TimeSource`]s for write stamps
//! - [`wire`] - request/response bodies of the HTTP protocol
//! - [`normalize`] - payload size bounding by stripping embedded binaries

#![warn(missing_docs)]

pub mod clock;
pub mod normalize;
pub mod record;
pub mod register;
pub mod wire;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use normalize::{normalize, Normalized, DEFAULT_PAYLOAD_LIMIT};
pub use record::SyncRecord;
pub use register::RemoteRegister;
pub use wire::{MergeRequest, MergeResponse, SnapshotResponse};
