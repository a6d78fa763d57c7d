//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay upstream responses to the client minus `Set-Cookie`
//! - Stream bodies frame by frame without buffering
//! - Produce bodiless responses for proxy-originated statuses
//!
//! # Design Decisions
//! - The proxy never fabricates a body
//! - Every other upstream header passes through verbatim

use std::time::Duration;

use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::{Response, StatusCode};
use futures_util::StreamExt;

use crate::resilience::timeouts::with_deadline;
use crate::upstream::TransportError;

/// Client-facing copy of an upstream response.
///
/// Status and headers are copied, `Set-Cookie` is dropped, and the body is
/// handed through untouched so chunks reach the client as they arrive.
pub fn relay(upstream: Response<Body>) -> Response<Body> {
    let (parts, body) = upstream.into_parts();

    let mut headers = parts.headers;
    headers.remove(SET_COOKIE);

    let mut response = Response::new(body);
    *response.status_mut() = parts.status;
    *response.headers_mut() = headers;
    response
}

/// A response with `status` and no body.
pub fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Read `body` to its end within `limit`, discarding the data.
///
/// A body that errors mid-stream counts as ended; only a stall is an error.
pub async fn drain(body: Body, limit: Duration) -> Result<(), TransportError> {
    with_deadline(limit, async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            if let Err(e) = chunk {
                tracing::debug!(error = %e, "Upstream body ended with error");
                break;
            }
        }
    })
    .await
}
