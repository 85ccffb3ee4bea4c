//! # FieldSync Storage
//!
//! Byte-store backends for the FieldSync journal.
//!
//! Backends are **opaque byte stores**: they know how to read, append,
//! flush and truncate a stream of bytes, and nothing else. All framing
//! and record interpretation lives in `fieldsync_store`; a backend never
//! sees a journal entry.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests and ephemeral outboxes
//! - [`FileBackend`] - persistent storage on the local file system
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"queued").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"queued");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
