//! ERS Session Proxy Library
//!
//! Relays client requests to an ERS reporting server while holding a single
//! authenticated session on the clients' behalf. When the server rejects the
//! session (404), the proxy reconnects once and resends the request.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod session;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::ErsProxy;
pub use session::ConnectOutcome;
