//! Session acquisition and termination against the upstream.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use axum::http::{HeaderValue, Method, Request, StatusCode};

use crate::config::TimeoutConfig;
use crate::http::response::drain;
use crate::observability::metrics;
use crate::resilience::timeouts::body_deadline;
use crate::session::cookies::capture_session_cookie;
use crate::session::store::SessionStore;
use crate::upstream::{Transport, TransportError, UpstreamEndpoint};

/// Session resource on the upstream: POST creates, DELETE terminates.
pub const SESSION_RESOURCE: &str = "/ers/v1/connection";

/// Result of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The upstream answered with this status; any cookies were captured.
    Answered(StatusCode),
    /// Transport failure before any answer.
    Unreachable,
}

impl ConnectOutcome {
    /// Status reported to callers; transport failures read as 503.
    pub fn status(self) -> StatusCode {
        match self {
            ConnectOutcome::Answered(status) => status,
            ConnectOutcome::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Owns connect/disconnect and is the only writer of the [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    endpoint: Arc<UpstreamEndpoint>,
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    body_deadline: Duration,
}

impl SessionManager {
    pub fn new(
        endpoint: Arc<UpstreamEndpoint>,
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoint,
            store,
            transport,
            body_deadline: body_deadline(&TimeoutConfig::default()),
        }
    }

    /// Limit on reading a session reply body.
    pub fn with_body_deadline(mut self, limit: Duration) -> Self {
        self.body_deadline = limit;
        self
    }

    /// Create a fresh session.
    ///
    /// The stored cookie is cleared first, so a stale cookie never survives a
    /// refresh. Any status counts as an answer; cookies are captured from it
    /// after the response body has ended.
    pub async fn connect(&self) -> ConnectOutcome {
        self.store.clear_cookie();

        let body = Body::from(serde_json::json!({}).to_string());
        let result = match self.session_request(Method::POST, body, false) {
            Ok(request) => match self.transport.send(request).await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    drain(body, self.body_deadline).await.map(|()| parts)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(parts) => {
                let captured = capture_session_cookie(&parts.headers);
                self.store.append_cookie(&captured);

                tracing::info!(
                    status = %parts.status,
                    session = self.store.has_session(),
                    "Session connect completed"
                );
                ConnectOutcome::Answered(parts.status)
            }
            Err(e) => {
                tracing::warn!(
                    upstream = %self.endpoint.authority(),
                    error = %e,
                    "Session connect failed"
                );
                metrics::record_transport_error("connect");
                ConnectOutcome::Unreachable
            }
        };

        metrics::record_session_connect(outcome.status().as_u16());
        outcome
    }

    /// Terminate the session. The cookie is cleared whatever the outcome.
    pub async fn disconnect(&self) {
        let result = match self.session_request(Method::DELETE, Body::empty(), true) {
            Ok(request) => self.transport.send(request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                let status = response.status();
                if let Err(e) = drain(response.into_body(), self.body_deadline).await {
                    tracing::debug!(error = %e, "Disconnect reply body abandoned");
                }
                tracing::info!(status = %status, "Session disconnected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session disconnect failed, clearing local session anyway");
                metrics::record_transport_error("disconnect");
            }
        }

        self.store.clear_cookie();
    }

    /// Prefix sent as `ERS-ContextRoot` on forwarded requests; `None` sends no header.
    pub fn set_context_root(&self, prefix: Option<String>) {
        tracing::debug!(context_root = ?prefix, "Context root updated");
        self.store.set_context_root(prefix);
    }

    fn session_request(
        &self,
        method: Method,
        body: Body,
        with_cookie: bool,
    ) -> Result<Request<Body>, TransportError> {
        let uri = self
            .endpoint
            .uri_for(SESSION_RESOURCE)
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, self.endpoint.authorization())
            .body(body)
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if request.method() == Method::POST {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if with_cookie {
            let cookie = self.store.cookie();
            if !cookie.is_empty() {
                let value = HeaderValue::from_str(&cookie)
                    .map_err(|e| TransportError::Request(e.to_string()))?;
                request.headers_mut().insert(COOKIE, value);
            }
        }

        Ok(request)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.endpoint)
            .field("has_session", &self.store.has_session())
            .finish()
    }
}
