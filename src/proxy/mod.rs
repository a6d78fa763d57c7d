//! Session proxy subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → exchange.rs (parts + body, recorded by replay.rs on the first send)
//!     → resilience::retries (state machine)
//!     → forwarder.rs (rewrite headers, stream body, classify reply)
//!     → upstream
//!
//! service.rs ties one session manager and one forwarder to one upstream.
//! ```

pub mod exchange;
pub mod forwarder;
pub mod replay;
pub mod service;

pub use exchange::ProxiedExchange;
pub use forwarder::{ForwardOutcome, Forwarder};
pub use service::ErsProxy;
