//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter
//! - Build the proxy and open the upstream session
//! - Start the config reload task
//! - Bind the listener and serve until a shutdown signal
//! - Close the upstream session on the way out
//!
//! # Design Decisions
//! - Fail fast on local errors (bad address, bind failure, TLS material)
//! - An unreachable upstream at startup is not fatal; the first rejected
//!   request reconnects

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::watcher::{apply_updates, ConfigWatcher};
use crate::config::ProxyConfig;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::session::ConnectOutcome;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Server(#[from] ServerError),
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_owned(),
    })
}

/// Run the proxy until SIGINT or SIGTERM.
///
/// `config_path` enables hot reload when the file exists.
pub async fn run(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = parse_addr(
            "observability.metrics_address",
            &config.observability.metrics_address,
        )?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config)?;
    let proxy = server.proxy().clone();

    if config.session.connect_on_startup {
        match proxy.connect().await {
            ConnectOutcome::Answered(status) if status.is_success() => {
                tracing::info!(status = %status, "Upstream session established");
            }
            outcome => tracing::warn!(
                status = %outcome.status(),
                "Upstream session not established at startup, will reconnect on demand"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server_rx = shutdown.subscribe();
    let reload_rx = shutdown.subscribe();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        trigger.trigger();
    });

    let _watcher = match config_path.filter(|path| path.exists()) {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            match watcher.run() {
                Ok(handle) => {
                    tokio::spawn(apply_updates(proxy.clone(), updates, reload_rx));
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let bind_address = config.listener.bind_address.clone();
    match &config.listener.tls {
        Some(tls) => {
            let addr = parse_addr("listener.bind_address", &bind_address)?;
            server.run_tls(addr, tls, server_rx).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address)
                .await
                .map_err(|source| StartupError::Bind {
                    address: bind_address.clone(),
                    source,
                })?;
            server.run(listener, server_rx).await?;
        }
    }

    if config.session.disconnect_on_shutdown {
        proxy.disconnect().await;
        tracing::info!("Upstream session closed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
