//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for remote submission.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote authority (e.g. `https://trace.example.com`).
    pub base_url: String,
    /// Per-request timeout.
    ///
    /// A submission that never resolves would stall the drain loop for
    /// its kind forever; the timeout converts a hang into a rejection so
    /// the pass can move on to the next record.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
