//! HTTP transport layer.
//!
//! The session manager and API client speak to the backend through the
//! `HttpTransport` trait so tests can substitute a recording mock and run
//! without a network. `UreqTransport` is the real implementation.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Network-level failure. Not interpreted further by this crate; callers
/// surface it for generic "please retry" handling.
#[derive(Debug, Error)]
#[error("request failed: {0}")]
pub struct TransportError(pub String);

/// Raw response: status plus body text. Bodies are parsed by the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Trait for HTTP transports to allow mocking and abstraction.
pub trait HttpTransport {
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport over a shared ureq agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for UreqTransport {
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.agent.request(method, url);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        let resp = match body {
            Some(json) => request.send_json(json.clone()),
            None => request.call(),
        };

        match resp {
            Ok(r) => {
                let status = r.status();
                let body = r
                    .into_string()
                    .map_err(|e| TransportError(e.to_string()))?;
                Ok(HttpResponse { status, body })
            }
            // Non-2xx statuses still carry a response the caller must see
            // (401 drives session invalidation).
            Err(ureq::Error::Status(code, r)) => {
                let body = r.into_string().unwrap_or_default();
                Ok(HttpResponse { status: code, body })
            }
            Err(e) => Err(TransportError(e.to_string())),
        }
    }
}
