//! Request handling and transformation.
//!
//! # Responsibilities
//! - Attach a request ID for log correlation
//! - Build the upstream header set from the inbound headers
//!
//! # Design Decisions
//! - The request ID lives in request extensions and is never forwarded
//! - Inbound headers pass through verbatim except `Host`
//! - The session cookie always overrides whatever the client sent

use std::task::{Context, Poll};

use axum::http::header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use tower::{Layer, Service};
use uuid::Uuid;

/// Inbound header whose value, when present, becomes the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Routing hint header understood by the upstream.
pub const CONTEXT_ROOT_HEADER: HeaderName = HeaderName::from_static("ers-contextroot");

/// Correlation ID for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse the caller's `x-request-id` if it is printable, else generate one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extension accessor for requests passing through [`RequestIdLayer`].
pub trait RequestIdExt {
    fn request_id(&self) -> RequestId;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> RequestId {
        self.extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId::from_headers(self.headers()))
    }
}

/// Tower layer inserting a [`RequestId`] extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RequestIdService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let id = RequestId::from_headers(request.headers());
        request.extensions_mut().insert(id);
        self.inner.call(request)
    }
}

/// Header set for the upstream copy of an inbound request.
///
/// Every inbound header except `Host` is copied. `Cookie` is then replaced by
/// the session cookie (even when empty), `Authorization` by the proxy's
/// credentials, and the context root header is added when configured.
pub fn upstream_headers(
    inbound: &HeaderMap,
    cookie: &str,
    authorization: HeaderValue,
    context_root: Option<&str>,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if *name == HOST {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(COOKIE, HeaderValue::from_str(cookie)?);
    headers.insert(AUTHORIZATION, authorization);
    if let Some(root) = context_root {
        headers.insert(CONTEXT_ROOT_HEADER, HeaderValue::from_str(root)?);
    }

    Ok(headers)
}
