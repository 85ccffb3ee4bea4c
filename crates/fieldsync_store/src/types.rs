//! Core type definitions for the record store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an offline record.
///
/// Record ids are assigned by the store, monotonically increasing, and
/// never reused - not even after pruning or journal compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Creates a record id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// The kind of an offline record; each kind is its own collection.
///
/// The store enforces no referential integrity between kinds - an event
/// may carry a correlation key for a batch the store has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A traceability event.
    Event,
    /// A batch registration.
    Batch,
}

impl RecordKind {
    /// All record kinds, in drain order.
    pub const ALL: [RecordKind; 2] = [RecordKind::Event, RecordKind::Batch];

    /// Returns the kind's collection name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Event => "events",
            RecordKind::Batch => "batches",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
