//! One inbound request on its way through the proxy.

use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::http::{request, HeaderMap, Method, Request};

use crate::http::request::{RequestId, RequestIdExt};
use crate::proxy::replay::BodyRecorder;
use crate::resilience::retries::RetryPolicy;

enum ExchangeBody {
    /// Not read yet.
    Inbound(Body),
    /// Read once, with a recording for the retry.
    Recorded(Arc<BodyRecorder>),
    /// Known to be empty, or already handed off without a recording.
    Empty,
}

/// An inbound request plus what is needed to send it upstream again.
///
/// Created per client request and consumed by at most one retry cycle.
pub struct ProxiedExchange {
    parts: request::Parts,
    body: ExchangeBody,
    request_id: RequestId,
    replay_limit: usize,
}

impl ProxiedExchange {
    pub fn new(request: Request<Body>, replay_limit: usize) -> Self {
        let request_id = request.request_id();
        let (parts, body) = request.into_parts();
        let body = if body.is_end_stream() {
            ExchangeBody::Empty
        } else {
            ExchangeBody::Inbound(body)
        };
        Self {
            parts,
            body,
            request_id,
            replay_limit,
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Client path plus query string, e.g. `/report?x=1`.
    pub fn path_and_query(&self) -> &str {
        self.parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Body for the next upstream attempt.
    ///
    /// The first call streams the inbound body; under
    /// [`RetryPolicy::OnSessionRejected`] it is recorded on the way. Later
    /// calls replay the recording.
    pub fn take_body(&mut self, policy: RetryPolicy) -> Body {
        match std::mem::replace(&mut self.body, ExchangeBody::Empty) {
            ExchangeBody::Inbound(body) => match policy {
                RetryPolicy::OnSessionRejected => {
                    let recorder = BodyRecorder::new(self.replay_limit);
                    let teed = recorder.tee(body);
                    self.body = ExchangeBody::Recorded(recorder);
                    teed
                }
                RetryPolicy::Never => body,
            },
            ExchangeBody::Recorded(recorder) => {
                let replay = recorder.replay().unwrap_or_else(|| {
                    tracing::warn!(
                        request_id = %self.request_id,
                        "Request body unavailable for retransmission, sending empty body"
                    );
                    Body::empty()
                });
                self.body = ExchangeBody::Recorded(recorder);
                replay
            }
            ExchangeBody::Empty => Body::empty(),
        }
    }

    /// Whether the request can be sent again with an identical body.
    pub fn is_replayable(&self) -> bool {
        match &self.body {
            ExchangeBody::Empty => true,
            ExchangeBody::Recorded(recorder) => recorder.is_complete(),
            ExchangeBody::Inbound(_) => false,
        }
    }
}

impl std::fmt::Debug for ProxiedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedExchange")
            .field("request_id", &self.request_id)
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("replayable", &self.is_replayable())
            .finish()
    }
}
