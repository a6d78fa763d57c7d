//! Session-refresh retry.
//!
//! # States
//! ```text
//! Idle → Forwarding            first attempt, rejection intercepted
//! Forwarding → Done            response delivered, or transport failure (503)
//! Forwarding → AwaitingReconnect   upstream answered 404
//! AwaitingReconnect → Done     reconnect answered 404, or upstream unreachable
//! AwaitingReconnect → Retrying any other reconnect status
//! Retrying → Done              second attempt, delivered whatever it is
//! ```
//!
//! # Design Decisions
//! - Retrying forwards with `RetryPolicy::Never`, so a loop cannot be built
//! - Transport errors are never retried
//! - No counter and no backoff: there is exactly one refresh per request

use axum::body::Body;
use axum::http::{Response, StatusCode};

use crate::http::response::empty;
use crate::observability::metrics;
use crate::proxy::exchange::ProxiedExchange;
use crate::proxy::forwarder::{ForwardOutcome, Forwarder};
use crate::session::{ConnectOutcome, SessionManager};

/// Upstream status meaning "your session cookie is no longer valid".
///
/// Indistinguishable from a genuine missing resource; a first attempt always
/// reads it as a rejected session.
pub const SESSION_REJECTED: StatusCode = StatusCode::NOT_FOUND;

/// Whether a forwarding attempt may hand a rejection back for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// First attempt: a rejection is returned to the controller, not the client.
    OnSessionRejected,
    /// Retry attempt: everything goes to the client.
    Never,
}

enum RetryState {
    Idle(ProxiedExchange),
    Forwarding(ProxiedExchange),
    AwaitingReconnect(ProxiedExchange),
    Retrying(ProxiedExchange),
    Done(Response<Body>),
}

/// Drives one exchange through at most one reconnect-then-retry cycle.
pub struct RetryController<'a> {
    session: &'a SessionManager,
    forwarder: &'a Forwarder,
}

impl<'a> RetryController<'a> {
    pub fn new(session: &'a SessionManager, forwarder: &'a Forwarder) -> Self {
        Self { session, forwarder }
    }

    pub async fn run(&self, exchange: ProxiedExchange) -> Response<Body> {
        let mut state = RetryState::Idle(exchange);
        loop {
            state = match state {
                RetryState::Idle(exchange) => RetryState::Forwarding(exchange),
                RetryState::Forwarding(exchange) => self.first_attempt(exchange).await,
                RetryState::AwaitingReconnect(exchange) => self.reconnect(exchange).await,
                RetryState::Retrying(exchange) => self.retry(exchange).await,
                RetryState::Done(response) => return response,
            };
        }
    }

    async fn first_attempt(&self, exchange: ProxiedExchange) -> RetryState {
        match self
            .forwarder
            .forward(exchange, RetryPolicy::OnSessionRejected)
            .await
        {
            ForwardOutcome::Delivered(response) => RetryState::Done(response),
            ForwardOutcome::Rejected { status, exchange } if status == SESSION_REJECTED => {
                tracing::info!(
                    request_id = %exchange.request_id(),
                    "Session rejected by upstream, reconnecting"
                );
                RetryState::AwaitingReconnect(exchange)
            }
            ForwardOutcome::Rejected { status, .. } => RetryState::Done(empty(status)),
        }
    }

    async fn reconnect(&self, exchange: ProxiedExchange) -> RetryState {
        match self.session.connect().await {
            ConnectOutcome::Answered(status) if status == SESSION_REJECTED => {
                tracing::warn!(
                    request_id = %exchange.request_id(),
                    status = %status,
                    "Reconnect rejected, giving up"
                );
                metrics::record_retry("reconnect_rejected");
                RetryState::Done(empty(status))
            }
            ConnectOutcome::Unreachable => {
                tracing::warn!(
                    request_id = %exchange.request_id(),
                    "Upstream unreachable during reconnect"
                );
                metrics::record_retry("reconnect_failed");
                RetryState::Done(empty(StatusCode::SERVICE_UNAVAILABLE))
            }
            ConnectOutcome::Answered(status) => {
                tracing::debug!(
                    request_id = %exchange.request_id(),
                    status = %status,
                    "Reconnected, retrying request"
                );
                RetryState::Retrying(exchange)
            }
        }
    }

    async fn retry(&self, exchange: ProxiedExchange) -> RetryState {
        metrics::record_retry("retried");
        match self.forwarder.forward(exchange, RetryPolicy::Never).await {
            ForwardOutcome::Delivered(response) => RetryState::Done(response),
            // Not produced under `Never`.
            ForwardOutcome::Rejected { status, .. } => RetryState::Done(empty(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionStore, SESSION_RESOURCE};
    use crate::upstream::transport::testing::{reply, ScriptedTransport};
    use crate::upstream::{Credentials, TransportError, UpstreamEndpoint};
    use axum::http::header::COOKIE;
    use axum::http::{Method, Request};
    use std::sync::Arc;

    struct Harness {
        session: SessionManager,
        forwarder: Forwarder,
        transport: Arc<ScriptedTransport>,
    }

    impl Harness {
        fn new(transport: Arc<ScriptedTransport>) -> Self {
            let endpoint = Arc::new(
                UpstreamEndpoint::parse(
                    "http://ers.local:9080",
                    Credentials {
                        user: "user".into(),
                        password: "pass".into(),
                    },
                )
                .unwrap(),
            );
            let store = Arc::new(SessionStore::new());
            Self {
                session: SessionManager::new(endpoint.clone(), store.clone(), transport.clone()),
                forwarder: Forwarder::new(endpoint, store, transport.clone()),
                transport,
            }
        }

        async fn run(&self, method: Method, uri: &str, body: Body) -> (StatusCode, String) {
            let request = Request::builder().method(method).uri(uri).body(body).unwrap();
            let exchange = ProxiedExchange::new(request, 1024);
            let response = RetryController::new(&self.session, &self.forwarder)
                .run(exchange)
                .await;
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, String::from_utf8(bytes.to_vec()).unwrap())
        }

        fn forwards(&self) -> usize {
            self.transport.seen().len() - self.transport.calls_to(SESSION_RESOURCE)
        }
    }

    #[tokio::test]
    async fn delivers_first_attempt_without_reconnect() {
        let harness = Harness::new(ScriptedTransport::new(|_, _| Ok(reply(200, &[], "report"))));

        let (status, body) = harness.run(Method::GET, "/report", Body::empty()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "report");
        assert_eq!(harness.transport.calls_to(SESSION_RESOURCE), 0);
    }

    #[tokio::test]
    async fn reconnects_and_retries_once_after_rejection() {
        let harness = Harness::new(ScriptedTransport::new(|seen, _| {
            if seen.uri.path() == SESSION_RESOURCE {
                return Ok(reply(200, &[("set-cookie", "SID=abc; Path=/")], ""));
            }
            match seen.headers.get(COOKIE).and_then(|c| c.to_str().ok()) {
                Some("SID=abc;") => Ok(reply(200, &[], "{\"ok\":true}")),
                _ => Ok(reply(404, &[], "")),
            }
        }));

        let (status, body) = harness.run(Method::GET, "/report?x=1", Body::empty()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"ok\":true}");

        let seen = harness.transport.seen();
        let paths: Vec<_> = seen.iter().map(|s| s.uri.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "http://ers.local:9080/report?x=1",
                "http://ers.local:9080/ers/v1/connection",
                "http://ers.local:9080/report?x=1",
            ]
        );
        assert_eq!(seen[0].headers[COOKIE], "");
        assert_eq!(seen[2].headers[COOKIE], "SID=abc;");
    }

    #[tokio::test]
    async fn second_rejection_reaches_client() {
        let harness = Harness::new(ScriptedTransport::new(|seen, _| {
            if seen.uri.path() == SESSION_RESOURCE {
                Ok(reply(200, &[("set-cookie", "SID=abc; Path=/")], ""))
            } else {
                Ok(reply(404, &[], "no such report"))
            }
        }));

        let (status, body) = harness.run(Method::GET, "/report/99", Body::empty()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "no such report");
        assert_eq!(harness.forwards(), 2);
        assert_eq!(harness.transport.calls_to(SESSION_RESOURCE), 1);
    }

    #[tokio::test]
    async fn rejected_reconnect_short_circuits() {
        let harness = Harness::new(ScriptedTransport::new(|_, _| Ok(reply(404, &[], "nope"))));

        let (status, body) = harness.run(Method::GET, "/report", Body::empty()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "");
        assert_eq!(harness.forwards(), 1);
    }

    #[tokio::test]
    async fn unreachable_reconnect_is_503_without_retry() {
        let harness = Harness::new(ScriptedTransport::new(|seen, _| {
            if seen.uri.path() == SESSION_RESOURCE {
                Err(TransportError::Connect("connection refused".into()))
            } else {
                Ok(reply(404, &[], ""))
            }
        }));

        let (status, body) = harness.run(Method::GET, "/report", Body::empty()).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "");
        assert_eq!(harness.forwards(), 1);
    }

    #[tokio::test]
    async fn non_success_reconnect_still_retries() {
        let harness = Harness::new(ScriptedTransport::new(|seen, _| {
            if seen.uri.path() == SESSION_RESOURCE {
                Ok(reply(401, &[], ""))
            } else {
                Ok(reply(404, &[], ""))
            }
        }));

        let (status, _) = harness.run(Method::GET, "/report", Body::empty()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(harness.forwards(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_503_without_reconnect() {
        let harness = Harness::new(ScriptedTransport::new(|_, _| {
            Err(TransportError::Timeout(30))
        }));

        let (status, body) = harness.run(Method::GET, "/report", Body::empty()).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "");
        assert_eq!(harness.transport.calls_to(SESSION_RESOURCE), 0);
        assert_eq!(harness.forwards(), 1);
    }

    #[tokio::test]
    async fn retry_resends_request_body() {
        let harness = Harness::new(ScriptedTransport::new(|seen, index| {
            if seen.uri.path() == SESSION_RESOURCE {
                Ok(reply(200, &[("set-cookie", "SID=abc; Path=/")], ""))
            } else if index == 0 {
                Ok(reply(404, &[], ""))
            } else {
                Ok(reply(200, &[], "saved"))
            }
        }));

        let (status, _) = harness
            .run(Method::POST, "/report/run", Body::from("{\"format\":\"pdf\"}"))
            .await;

        assert_eq!(status, StatusCode::OK);
        let seen = harness.transport.seen();
        assert_eq!(seen[0].body, seen[2].body);
        assert_eq!(&seen[2].body[..], b"{\"format\":\"pdf\"}");
    }
}
