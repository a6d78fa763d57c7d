//! The session-maintaining proxy for one upstream.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};

use crate::config::ProxyConfig;
use crate::proxy::exchange::ProxiedExchange;
use crate::proxy::forwarder::Forwarder;
use crate::resilience::timeouts::body_deadline;
use crate::resilience::RetryController;
use crate::session::{ConnectOutcome, SessionManager, SessionStore};
use crate::upstream::{EndpointError, HyperTransport, Transport, UpstreamEndpoint};

/// One upstream, one session, shared by every inbound request.
///
/// Cloning is cheap; clones share the session.
#[derive(Clone, Debug)]
pub struct ErsProxy {
    endpoint: Arc<UpstreamEndpoint>,
    store: Arc<SessionStore>,
    session: SessionManager,
    forwarder: Forwarder,
    replay_limit: usize,
}

impl ErsProxy {
    /// Build a proxy with the hyper transport described by `config`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, EndpointError> {
        let transport = Arc::new(HyperTransport::new(&config.timeouts));
        Self::new(config, transport)
    }

    pub fn new(config: &ProxyConfig, transport: Arc<dyn Transport>) -> Result<Self, EndpointError> {
        let endpoint = Arc::new(UpstreamEndpoint::from_config(&config.upstream)?);
        let store = Arc::new(SessionStore::new());
        store.set_context_root(config.upstream.context_root.clone());
        let drain_limit = body_deadline(&config.timeouts);

        tracing::info!(
            upstream = %endpoint.authority(),
            scheme = ?endpoint.scheme(),
            "Upstream resolved"
        );

        Ok(Self {
            session: SessionManager::new(endpoint.clone(), store.clone(), transport.clone())
                .with_body_deadline(drain_limit),
            forwarder: Forwarder::new(endpoint.clone(), store.clone(), transport)
                .with_body_deadline(drain_limit),
            endpoint,
            store,
            replay_limit: config.session.replay_limit_bytes,
        })
    }

    /// Relay one client request, refreshing the session once if it was rejected.
    pub async fn execute(&self, request: Request<Body>) -> Response<Body> {
        let exchange = ProxiedExchange::new(request, self.replay_limit);
        RetryController::new(&self.session, &self.forwarder)
            .run(exchange)
            .await
    }

    pub async fn connect(&self) -> ConnectOutcome {
        self.session.connect().await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }

    pub fn set_context_root(&self, prefix: Option<String>) {
        self.session.set_context_root(prefix);
    }

    /// Current session cookie pairs.
    pub fn cookie(&self) -> String {
        self.store.cookie().as_str().to_owned()
    }

    /// Context root currently sent upstream.
    pub fn context_root(&self) -> Option<String> {
        self.store.context_root().map(|prefix| prefix.as_str().to_owned())
    }

    pub fn endpoint(&self) -> &UpstreamEndpoint {
        &self.endpoint
    }

    /// Apply a reloaded configuration.
    ///
    /// Only the context root changes live. A different upstream is logged and
    /// ignored until restart.
    pub fn apply_config(&self, config: &ProxyConfig) {
        let current = self.store.context_root();
        if current.as_deref() != config.upstream.context_root.as_ref() {
            tracing::info!(
                context_root = ?config.upstream.context_root,
                "Applying reloaded context root"
            );
            self.set_context_root(config.upstream.context_root.clone());
        }

        match UpstreamEndpoint::from_config(&config.upstream) {
            Ok(endpoint) if endpoint != *self.endpoint => {
                tracing::warn!(
                    current = %self.endpoint.authority(),
                    configured = %endpoint.authority(),
                    "Upstream settings changed; restart required to apply"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring invalid upstream in reloaded config"),
        }
    }
}
