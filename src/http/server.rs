//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (tracing, request ID)
//! - Bound each exchange; an expired deadline answers an empty 503
//! - Serve plain TCP or rustls-terminated connections
//! - Stop accepting on shutdown and drain in-flight exchanges

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    routing::any,
    Router,
};
use axum_server::Handle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::{ProxyConfig, TlsConfig};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::http::response::empty;
use crate::net::tls::load_tls_config;
use crate::observability::metrics;
use crate::proxy::ErsProxy;
use crate::resilience::timeouts::{exchange_deadline, with_deadline};
use crate::upstream::{EndpointError, HyperTransport, Transport};

/// How long TLS connections may drain after shutdown is signalled.
const TLS_DRAIN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: ErsProxy,
    /// Budget for forward, reconnect and retry together.
    pub deadline: Duration,
}

/// HTTP front end of the session proxy.
pub struct HttpServer {
    router: Router,
    proxy: ErsProxy,
}

impl HttpServer {
    /// Create a server that reaches the upstream over hyper.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        let transport = Arc::new(HyperTransport::new(&config.timeouts));
        Self::with_transport(config, transport)
    }

    /// Create a server over an arbitrary transport.
    pub fn with_transport(
        config: &ProxyConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ServerError> {
        let proxy = ErsProxy::new(config, transport)?;
        let router = Self::build_router(AppState {
            proxy: proxy.clone(),
            deadline: exchange_deadline(&config.timeouts),
        });
        Ok(Self { router, proxy })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Handle to the proxy for session management outside request handling.
    pub fn proxy(&self) -> &ErsProxy {
        &self.proxy
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let rustls = load_tls_config(tls).await.map_err(ServerError::Tls)?;

        let handle = Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            signal.graceful_shutdown(Some(TLS_DRAIN_GRACE));
        });

        tracing::info!(address = %addr, "HTTPS server starting");
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Relay any method on any path through the session proxy.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().clone();
    let request_id = request.request_id();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        "Proxying request"
    );

    let response = match with_deadline(state.deadline, state.proxy.execute(request)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Exchange deadline expired");
            empty(StatusCode::SERVICE_UNAVAILABLE)
        }
    };
    let status = response.status();

    tracing::debug!(
        request_id = %request_id,
        status = %status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    metrics::record_request(method.as_str(), status.as_u16(), start);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::transport::testing::{reply, ScriptedTransport};
    use crate::upstream::TransportError;
    use futures_util::future::BoxFuture;
    use tower::ServiceExt;

    /// Upstream that accepts requests and never answers.
    struct Silent;

    impl Transport for Silent {
        fn send(&self, _: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn routes_every_path_to_the_proxy() {
        let transport = ScriptedTransport::new(|_, _| Ok(reply(200, &[], "ok")));
        let server = HttpServer::with_transport(&ProxyConfig::default(), transport.clone()).unwrap();

        for uri in ["/", "/deep/nested/path?q=1"] {
            let response = server
                .router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let seen = transport.seen();
        assert_eq!(seen[0].uri.path(), "/");
        assert_eq!(seen[1].uri.path_and_query().unwrap(), "/deep/nested/path?q=1");
    }

    #[tokio::test]
    async fn expired_exchange_deadline_is_empty_503() {
        let proxy = ErsProxy::new(&ProxyConfig::default(), Arc::new(Silent)).unwrap();
        let router = HttpServer::build_router(AppState {
            proxy,
            deadline: Duration::from_millis(50),
        });

        let response = router
            .oneshot(Request::builder().uri("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }
}
