//! Remote submission transport abstraction.

use fieldsync_store::{Credential, RecordKind, RecordPayload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Why a submission did not land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The remote authority answered with a non-2xx status.
    Http(u16),
    /// The request never completed (DNS, connect, TLS, broken pipe).
    Transport,
    /// The request exceeded the configured timeout.
    Timeout,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Http(status) => write!(f, "http {status}"),
            RejectionReason::Transport => f.write_str("transport"),
            RejectionReason::Timeout => f.write_str("timeout"),
        }
    }
}

/// A failed submission, reported as a value.
///
/// Rejections never cross the orchestrator boundary as errors: the pass
/// logs them, leaves the record unsynced, and moves on. A stale
/// credential looks exactly like any other rejection here - the record
/// waits for a future pass under whatever credentials it was written with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("submission rejected ({reason}): {message}")]
pub struct RemoteRejection {
    /// Classification of the failure.
    pub reason: RejectionReason,
    /// Human-readable detail for the log line.
    pub message: String,
}

impl RemoteRejection {
    /// A non-2xx response.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            reason: RejectionReason::Http(status),
            message: message.into(),
        }
    }

    /// A transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            reason: RejectionReason::Transport,
            message: message.into(),
        }
    }

    /// A request that ran into the configured timeout.
    pub fn timeout() -> Self {
        Self {
            reason: RejectionReason::Timeout,
            message: "request timed out".into(),
        }
    }
}

/// Posts one record's payload to the remote authority.
///
/// A submission is a single request. The transport performs no retries;
/// retry happens only because a rejected record stays unsynced and is
/// reattempted on the *next* sync pass.
pub trait RecordTransport: Send + Sync {
    /// Submits the payload under the record's captured credential.
    fn submit(
        &self,
        kind: RecordKind,
        payload: &RecordPayload,
        credential: &Credential,
    ) -> Result<(), RemoteRejection>;
}

/// A scripted transport for tests.
///
/// Outcomes are consumed in submission order; once the script runs dry,
/// every further submission succeeds. Each call is recorded so tests can
/// assert on submission order and credentials.
#[derive(Default)]
pub struct MockTransport {
    outcomes: Mutex<VecDeque<Result<(), RemoteRejection>>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
}

/// One call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    /// Kind that was submitted.
    pub kind: RecordKind,
    /// The payload data the transport saw.
    pub data: serde_json::Value,
    /// The bearer token the transport saw.
    pub token: String,
}

impl MockTransport {
    /// Creates a transport where every submission succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful outcome.
    pub fn push_success(&self) {
        self.outcomes.lock().push_back(Ok(()));
    }

    /// Queues a rejection outcome.
    pub fn push_rejection(&self, rejection: RemoteRejection) {
        self.outcomes.lock().push_back(Err(rejection));
    }

    /// Returns every submission seen so far, in call order.
    #[must_use]
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().clone()
    }

    /// Number of submissions seen so far.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

impl RecordTransport for MockTransport {
    fn submit(
        &self,
        kind: RecordKind,
        payload: &RecordPayload,
        credential: &Credential,
    ) -> Result<(), RemoteRejection> {
        self.submissions.lock().push(RecordedSubmission {
            kind,
            data: payload.data().clone(),
            token: credential.as_str().to_string(),
        });

        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: u64) -> RecordPayload {
        RecordPayload::Event {
            batch_key: None,
            data: json!({"n": n}),
        }
    }

    #[test]
    fn mock_defaults_to_success() {
        let transport = MockTransport::new();
        let result = transport.submit(RecordKind::Event, &payload(1), &"tok".into());
        assert!(result.is_ok());
        assert_eq!(transport.submission_count(), 1);
    }

    #[test]
    fn mock_consumes_scripted_outcomes_in_order() {
        let transport = MockTransport::new();
        transport.push_rejection(RemoteRejection::http(500, "boom"));
        transport.push_success();

        let first = transport.submit(RecordKind::Event, &payload(1), &"tok".into());
        let second = transport.submit(RecordKind::Event, &payload(2), &"tok".into());
        let third = transport.submit(RecordKind::Event, &payload(3), &"tok".into());

        assert_eq!(first, Err(RemoteRejection::http(500, "boom")));
        assert!(second.is_ok());
        assert!(third.is_ok()); // script ran dry
    }

    #[test]
    fn mock_records_what_it_saw() {
        let transport = MockTransport::new();
        transport
            .submit(RecordKind::Batch, &payload(7), &"tok-7".into())
            .unwrap();

        let seen = transport.submissions();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, RecordKind::Batch);
        assert_eq!(seen[0].data, json!({"n": 7}));
        assert_eq!(seen[0].token, "tok-7");
    }

    #[test]
    fn rejection_display() {
        let rejection = RemoteRejection::http(401, "unauthorized");
        assert_eq!(
            rejection.to_string(),
            "submission rejected (http 401): unauthorized"
        );
        assert_eq!(RemoteRejection::timeout().reason, RejectionReason::Timeout);
    }
}
