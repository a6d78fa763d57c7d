//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, catch-all handler)
//!     → request.rs (request ID, upstream header rewrite)
//!     → [proxy forwards, retrying once on session rejection]
//!     → response.rs (strip session cookies, stream body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, CONTEXT_ROOT_HEADER, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
