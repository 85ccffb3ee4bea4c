//! # FieldSync Engine
//!
//! Connectivity monitoring and sync orchestration for FieldSync.
//!
//! This crate provides:
//! - Sync pass state machine (idle -> draining -> pruning -> idle)
//! - Connectivity monitor with online/offline observers
//! - Remote submission transport abstraction
//! - HTTP transport with bearer credentials and per-request timeouts
//!
//! ## Architecture
//!
//! The engine implements a **drain-then-prune** pass over the outbox:
//! 1. Skip the pass entirely while offline
//! 2. Submit every unsynced record sequentially, per kind
//! 3. Prune everything marked synced, this pass or earlier
//!
//! A single record's failure never aborts the pass: rejected records
//! stay unsynced and are reattempted on the next online transition.
//!
//! ## Key Invariants
//!
//! - Submission within a kind is sequential, in store order
//! - A record is marked synced before the next record is attempted
//! - The pass always completes; nothing propagates to the trigger
//! - The online transition is the sole automatic trigger
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fieldsync_engine::{ConnectivityMonitor, MockTransport, SyncEngine};
//! use fieldsync_store::OutboxStore;
//!
//! let store = Arc::new(OutboxStore::open_in_memory().unwrap());
//! let monitor = Arc::new(ConnectivityMonitor::new(false));
//! let engine = Arc::new(SyncEngine::new(
//!     Arc::clone(&store),
//!     MockTransport::new(),
//!     Arc::clone(&monitor),
//! ));
//! SyncEngine::start(&engine);
//!
//! // Records queued while offline drain on this transition.
//! monitor.set_online(true);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod http;
mod transport;

pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use engine::{PassState, SyncEngine, SyncOutcome, SyncReport, SyncStats};
pub use http::{HttpCallError, HttpClient, HttpTransport, ReqwestClient};
pub use transport::{
    MockTransport, RecordTransport, RecordedSubmission, RejectionReason, RemoteRejection,
};
