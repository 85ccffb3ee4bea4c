//! Offline record and payload types.

use crate::types::{RecordId, RecordKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bearer credential captured at record creation time.
///
/// Each record owns its credential; it is replayed verbatim during
/// remote submission, however stale it may have become by then. The
/// `Debug` impl redacts all but the last four characters so tokens do
/// not leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Creates a credential from a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for header construction.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = if self.0.len() > 4 {
            &self.0[self.0.len() - 4..]
        } else {
            ""
        };
        write!(f, "Credential(..{tail})")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// The application-defined payload of an offline record, tagged by kind.
///
/// The store never inspects `data`; validation is the remote authority's
/// job. The correlation key is carried alongside the opaque data so the
/// store can index it without looking inside.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    /// A traceability event, optionally correlated to a batch.
    Event {
        /// Correlation key of the batch this event belongs to, if any.
        batch_key: Option<String>,
        /// Opaque event data, owned by the application layer.
        data: serde_json::Value,
    },
    /// A batch registration; the correlation key is unique per store.
    Batch {
        /// The batch's correlation key.
        batch_key: String,
        /// Opaque batch data, owned by the application layer.
        data: serde_json::Value,
    },
}

impl RecordPayload {
    /// Returns the record kind this payload is tagged with.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::Event { .. } => RecordKind::Event,
            RecordPayload::Batch { .. } => RecordKind::Batch,
        }
    }

    /// Returns the opaque payload data.
    #[must_use]
    pub fn data(&self) -> &serde_json::Value {
        match self {
            RecordPayload::Event { data, .. } | RecordPayload::Batch { data, .. } => data,
        }
    }

    /// Returns the batch correlation key, if the payload carries one.
    #[must_use]
    pub fn batch_key(&self) -> Option<&str> {
        match self {
            RecordPayload::Event { batch_key, .. } => batch_key.as_deref(),
            RecordPayload::Batch { batch_key, .. } => Some(batch_key),
        }
    }
}

/// A record queued for remote submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineRecord {
    /// Store-assigned identifier, stable for the record's lifetime.
    pub id: RecordId,
    /// The application payload, tagged by kind.
    pub payload: RecordPayload,
    /// Bearer credential captured at append time.
    pub credential: Credential,
    /// Local write timestamp, Unix epoch milliseconds.
    pub created_at_ms: u64,
    /// False at creation; set true only after a confirmed submission.
    pub synced: bool,
}
