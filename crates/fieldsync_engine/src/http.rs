//! HTTP submission transport.
//!
//! The actual HTTP client sits behind a trait so tests can exercise the
//! endpoint mapping and status handling without a network, and so
//! embedders can bring their own client.

use crate::config::SyncConfig;
use crate::transport::{RecordTransport, RemoteRejection};
use fieldsync_store::{Credential, RecordKind, RecordPayload};
use std::time::Duration;

const EVENTS_PATH: &str = "/api/events";
const BATCHES_PATH: &str = "/api/batches";

/// How an HTTP call failed before producing a status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpCallError {
    /// The request exceeded the client's timeout.
    TimedOut,
    /// Any other transport-level failure.
    Failed(String),
}

/// Minimal HTTP client abstraction.
///
/// Implementations send a single POST with a bearer credential and
/// report the response status. Timeouts must be distinguished from other
/// failures so the transport can classify the rejection.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response status code.
    fn post(&self, url: &str, bearer: &str, body: &[u8]) -> Result<u16, HttpCallError>;
}

/// Submits records to the remote authority over HTTP.
///
/// Events go to `POST {base_url}/api/events`, batches to
/// `POST {base_url}/api/batches`, body = the payload data as JSON,
/// `Authorization: Bearer <credential>`. Any 2xx status is success;
/// everything else becomes a [`RemoteRejection`].
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport posting to `config.base_url` via `client`.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL submissions are posted under.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::Event => EVENTS_PATH,
            RecordKind::Batch => BATCHES_PATH,
        }
    }
}

impl HttpTransport<ReqwestClient> {
    /// Creates a transport backed by a blocking reqwest client with the
    /// configured per-request timeout.
    #[must_use]
    pub fn with_reqwest(config: &SyncConfig) -> Self {
        let client = ReqwestClient::new(config.request_timeout);
        Self::new(config, client)
    }
}

impl<C: HttpClient> RecordTransport for HttpTransport<C> {
    fn submit(
        &self,
        kind: RecordKind,
        payload: &RecordPayload,
        credential: &Credential,
    ) -> Result<(), RemoteRejection> {
        let body = serde_json::to_vec(payload.data())
            .map_err(|e| RemoteRejection::transport(format!("unencodable payload: {e}")))?;
        let url = format!("{}{}", self.base_url, Self::endpoint(kind));

        match self.client.post(&url, credential.as_str(), &body) {
            Ok(status) if (200..300).contains(&status) => Ok(()),
            Ok(status) => Err(RemoteRejection::http(
                status,
                format!("POST {} returned {status}", Self::endpoint(kind)),
            )),
            Err(HttpCallError::TimedOut) => Err(RemoteRejection::timeout()),
            Err(HttpCallError::Failed(message)) => Err(RemoteRejection::transport(message)),
        }
    }
}

/// [`HttpClient`] backed by a blocking reqwest client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with the given per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client }
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, bearer: &str, body: &[u8]) -> Result<u16, HttpCallError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    HttpCallError::TimedOut
                } else {
                    HttpCallError::Failed(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}
