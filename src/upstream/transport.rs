//! HTTP transport to the upstream.
//!
//! # Responsibilities
//! - Open plain or TLS connections to the upstream
//! - Exchange one request/response per call with streamed bodies
//! - Classify failures (connect, timeout, request)

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::TimeoutConfig;
use crate::resilience::timeouts::with_deadline;

/// Transport-level failures. All of them surface to the client as 503.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, DNS or TLS failure.
    #[error("connect failed: {0}")]
    Connect(String),

    /// No response headers within the deadline.
    #[error("no response after {0} seconds")]
    Timeout(u64),

    /// The request could not be built or was aborted mid-flight.
    #[error("request failed: {0}")]
    Request(String),
}

/// Sends one request to the upstream.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>>;
}

/// hyper-util client over an HTTPS-or-HTTP connector.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);

        Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
        }
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        Box::pin(async move {
            let response: Response<Incoming> = with_deadline(self.request_timeout, self.client.request(request))
                .await?
                .map_err(|e| {
                    if e.is_connect() {
                        TransportError::Connect(error_chain(&e))
                    } else {
                        TransportError::Request(error_chain(&e))
                    }
                })?;
            Ok(response.map(Body::new))
        })
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// hyper-util's top-level message is generic; the cause is in the source chain.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
