//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! upstream.base_uri + credentials
//!     → endpoint.rs (host, port, scheme, basic auth; fixed for the process)
//!     → transport.rs (hyper-util client, plain or TLS, with deadlines)
//!     → session manager and forwarder
//! ```

pub mod endpoint;
pub mod transport;

pub use endpoint::{Credentials, EndpointError, Scheme, UpstreamEndpoint};
pub use transport::{HyperTransport, Transport, TransportError};
