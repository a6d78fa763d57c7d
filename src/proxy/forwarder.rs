//! Request forwarding to the upstream.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the upstream (target, headers, session)
//! - Stream bodies in both directions
//! - Classify the upstream reply: relay it, or report a session rejection

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};

use crate::config::TimeoutConfig;
use crate::http::request::upstream_headers;
use crate::http::response::{drain, empty, relay};
use crate::observability::metrics;
use crate::proxy::exchange::ProxiedExchange;
use crate::resilience::retries::{RetryPolicy, SESSION_REJECTED};
use crate::resilience::timeouts::body_deadline;
use crate::session::SessionStore;
use crate::upstream::{Transport, TransportError, UpstreamEndpoint};

/// What became of one forwarding attempt.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The client response, possibly still streaming from the upstream.
    Delivered(Response<Body>),
    /// Nothing was written to the client; the retry controller decides.
    ///
    /// Only produced under [`RetryPolicy::OnSessionRejected`].
    Rejected {
        status: StatusCode,
        exchange: ProxiedExchange,
    },
}

/// Relays exchanges to the upstream with the current session.
#[derive(Clone)]
pub struct Forwarder {
    endpoint: Arc<UpstreamEndpoint>,
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    body_deadline: Duration,
}

impl Forwarder {
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

    /// Limit on draining an intercepted rejection body.
    pub fn with_body_deadline(mut self, limit: Duration) -> Self {
        self.body_deadline = limit;
        self
    }

    /// Send `exchange` upstream once.
    ///
    /// With [`RetryPolicy::Never`] the outcome is always `Delivered`.
    pub async fn forward(&self, mut exchange: ProxiedExchange, policy: RetryPolicy) -> ForwardOutcome {
        let body = exchange.take_body(policy);

        let result = match self.build_request(&exchange, body) {
            Ok(request) => self.transport.send(request).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(response) if response.status() == SESSION_REJECTED
                && policy == RetryPolicy::OnSessionRejected
                && exchange.is_replayable() =>
            {
                tracing::debug!(
                    request_id = %exchange.request_id(),
                    "Upstream rejected session"
                );
                match drain(response.into_body(), self.body_deadline).await {
                    Ok(()) => {
                        return ForwardOutcome::Rejected {
                            status: SESSION_REJECTED,
                            exchange,
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            other => other,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %exchange.request_id(),
                    upstream = %self.endpoint.authority(),
                    error = %e,
                    "Upstream transport failure"
                );
                metrics::record_transport_error("forward");
                return match policy {
                    RetryPolicy::OnSessionRejected => ForwardOutcome::Rejected {
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        exchange,
                    },
                    RetryPolicy::Never => {
                        ForwardOutcome::Delivered(empty(StatusCode::SERVICE_UNAVAILABLE))
                    }
                };
            }
        };

        let status = response.status();
        if status == SESSION_REJECTED && policy == RetryPolicy::OnSessionRejected {
            tracing::debug!(
                request_id = %exchange.request_id(),
                "Request body not replayable, passing rejection through"
            );
        }

        tracing::debug!(
            request_id = %exchange.request_id(),
            status = %status,
            "Relaying upstream response"
        );
        ForwardOutcome::Delivered(relay(response))
    }

    fn build_request(&self, exchange: &ProxiedExchange, body: Body) -> Result<Request<Body>, TransportError> {
        let uri = self
            .endpoint
            .uri_for(exchange.path_and_query())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let cookie = self.store.cookie();
        let context_root = self.store.context_root();
        let headers = upstream_headers(
            exchange.headers(),
            &cookie,
            self.endpoint.authorization(),
            context_root.as_deref().map(String::as_str),
        )
        .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut request = Request::builder()
            .method(exchange.method().clone())
            .uri(uri)
            .body(body)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::CONTEXT_ROOT_HEADER;
    use crate::upstream::transport::testing::{reply, ScriptedTransport};
    use crate::upstream::Credentials;
    use axum::body::Bytes;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST, SET_COOKIE};
    use axum::http::Method;
    use futures_util::{stream, StreamExt};
    use std::convert::Infallible;

    fn forwarder(transport: Arc<ScriptedTransport>) -> (Forwarder, Arc<SessionStore>) {
        let endpoint = UpstreamEndpoint::parse(
            "http://ers.local:9080",
            Credentials {
                user: "user".into(),
                password: "pass".into(),
            },
        )
        .unwrap();
        let store = Arc::new(SessionStore::new());
        (
            Forwarder::new(Arc::new(endpoint), store.clone(), transport),
            store,
        )
    }

    fn exchange(method: Method, uri: &str, body: Body) -> ProxiedExchange {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "proxy.local")
            .header(COOKIE, "client=1")
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .unwrap();
        ProxiedExchange::new(request, 1024)
    }

    async fn body_of(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn rewrites_request_for_upstream() {
        let transport = ScriptedTransport::new(|_, _| Ok(reply(200, &[], "ok")));
        let (forwarder, store) = forwarder(transport.clone());
        store.append_cookie("SID=abc;");
        store.set_context_root(Some("/reports".into()));

        let outcome = forwarder
            .forward(exchange(Method::PUT, "/report/7?draft=true", Body::from("data")), RetryPolicy::OnSessionRejected)
            .await;
        assert!(matches!(outcome, ForwardOutcome::Delivered(_)));

        let seen = &transport.seen()[0];
        assert_eq!(seen.method, Method::PUT);
        assert_eq!(seen.uri.to_string(), "http://ers.local:9080/report/7?draft=true");
        assert!(seen.headers.get(HOST).is_none());
        assert_eq!(seen.headers[COOKIE], "SID=abc;");
        assert_eq!(seen.headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(seen.headers[CONTENT_TYPE], "text/plain");
        assert_eq!(seen.headers[CONTEXT_ROOT_HEADER], "/reports");
        assert_eq!(&seen.body[..], b"data");
    }

    #[tokio::test]
    async fn relays_status_headers_and_body() {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(reply(
                201,
                &[("set-cookie", "SID=new; Path=/"), ("x-report-id", "9")],
                "{\"ok\":true}",
            ))
        });
        let (forwarder, _) = forwarder(transport);

        let outcome = forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::Never)
            .await;
        let ForwardOutcome::Delivered(response) = outcome else {
            panic!("expected delivery");
        };

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(response.headers()["x-report-id"], "9");
        assert_eq!(body_of(response).await, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn streams_response_chunks_in_order() {
        let transport = ScriptedTransport::new(|_, _| {
            let chunks = ["part-1|", "part-2|", "part-3"]
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from_static(c.as_bytes())));
            Ok(Response::new(Body::from_stream(stream::iter(chunks))))
        });
        let (forwarder, _) = forwarder(transport);

        let ForwardOutcome::Delivered(response) = forwarder
            .forward(exchange(Method::GET, "/export", Body::empty()), RetryPolicy::Never)
            .await
        else {
            panic!("expected delivery");
        };

        let chunks: Vec<Bytes> = response
            .into_body()
            .into_data_stream()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["part-1|", "part-2|", "part-3"]);
    }

    #[tokio::test]
    async fn rejection_is_intercepted_when_retry_allowed() {
        let transport = ScriptedTransport::new(|_, _| Ok(reply(404, &[], "stale")));
        let (forwarder, _) = forwarder(transport);

        let outcome = forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::OnSessionRejected)
            .await;

        match outcome {
            ForwardOutcome::Rejected { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_passes_through_without_retry() {
        let transport = ScriptedTransport::new(|_, _| Ok(reply(404, &[], "missing")));
        let (forwarder, _) = forwarder(transport);

        let ForwardOutcome::Delivered(response) = forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::Never)
            .await
        else {
            panic!("expected delivery");
        };

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, "missing");
    }

    #[tokio::test]
    async fn unreplayable_body_passes_rejection_through() {
        let transport = ScriptedTransport::new(|_, _| Ok(reply(404, &[], "missing")));
        let endpoint = UpstreamEndpoint::parse(
            "http://ers.local:9080",
            Credentials {
                user: "u".into(),
                password: "p".into(),
            },
        )
        .unwrap();
        let forwarder = Forwarder::new(Arc::new(endpoint), Arc::new(SessionStore::new()), transport);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from("more than four bytes"))
            .unwrap();

        let outcome = forwarder
            .forward(ProxiedExchange::new(request, 4), RetryPolicy::OnSessionRejected)
            .await;

        let ForwardOutcome::Delivered(response) = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn transport_failure_depends_on_policy() {
        let transport =
            ScriptedTransport::new(|_, _| Err(TransportError::Connect("connection refused".into())));
        let (forwarder, _) = forwarder(transport);

        match forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::OnSessionRejected)
            .await
        {
            ForwardOutcome::Rejected { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let ForwardOutcome::Delivered(response) = forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::Never)
            .await
        else {
            panic!("expected delivery");
        };
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn stalled_rejection_body_is_transport_failure() {
        let transport = ScriptedTransport::new(|_, _| {
            let mut response = reply(404, &[], "");
            *response.body_mut() = Body::from_stream(stream::pending::<Result<Bytes, Infallible>>());
            Ok(response)
        });
        let (forwarder, _) = forwarder(transport);
        let forwarder = forwarder.with_body_deadline(Duration::from_millis(20));

        match forwarder
            .forward(exchange(Method::GET, "/report", Body::empty()), RetryPolicy::OnSessionRejected)
            .await
        {
            ForwardOutcome::Rejected { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
