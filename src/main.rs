//! ERS Session Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ resilience::retries ──▶ proxy::forwarder ──▶ ERS server
//!                                        │                       │
//!                                        ▼                       │
//!                                session::manager ──▶ session::store ◀┘
//!                                (connect / disconnect)    (cookie, context root)
//!
//!     Cross-cutting: config (TOML + hot reload), observability, lifecycle
//! ```

use std::path::PathBuf;

use ers_proxy::config::loader::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use ers_proxy::config::load_or_default;
use ers_proxy::lifecycle::startup;
use ers_proxy::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = PathBuf::from(
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned()),
    );
    let config = load_or_default(&config_path)?;

    logging::init(&config.observability);
    tracing::info!("ers-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = %config_path.display(),
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_uri,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    startup::run(config, Some(config_path)).await?;
    Ok(())
}
