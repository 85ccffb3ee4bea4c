//! # FieldSync Store
//!
//! Durable offline record store (outbox) for FieldSync.
//!
//! This crate provides:
//! - Typed offline record collections (events, batches)
//! - An append-only, CRC-framed journal for durability
//! - Crash recovery by journal replay, with torn-tail truncation
//! - Secondary lookup by creation time and batch correlation key
//! - Single-writer enforcement via a directory lock
//!
//! ## Key Invariants
//!
//! - Record ids are unique, monotonically assigned, never reused
//! - `synced` transitions only false -> true
//! - Pruning removes only synced records and is irreversible
//! - Every mutation is one journal entry; replay rebuilds the store
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_store::{Credential, OutboxStore, RecordKind, RecordPayload};
//!
//! let store = OutboxStore::open_in_memory().unwrap();
//! let id = store
//!     .append(
//!         RecordPayload::Event {
//!             batch_key: Some("B1".into()),
//!             data: serde_json::json!({"step": "harvest"}),
//!         },
//!         Credential::new("token"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(store.count(RecordKind::Event), 1);
//! store.mark_synced(RecordKind::Event, id).unwrap();
//! assert_eq!(store.prune_synced(RecordKind::Event).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod journal;
mod record;
mod store;
mod types;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use journal::{AppendEntry, Journal, JournalEntry};
pub use record::{Credential, OfflineRecord, RecordPayload};
pub use store::OutboxStore;
pub use types::{RecordId, RecordKind};
