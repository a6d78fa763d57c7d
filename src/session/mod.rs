//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! manager.rs connect()
//!     → clear store.rs cookie
//!     → POST /ers/v1/connection (basic auth, body "{}")
//!     → cookies.rs captures Set-Cookie prefixes
//!     → store.rs cookie = captured pairs
//!
//! forwarder reads store.rs on every request
//! ```
//!
//! # Design Decisions
//! - One store per proxy instance, injected rather than global
//! - Validity is never tracked; a 404 from the upstream means "reconnect"
//! - Disconnect always clears local state, even when the upstream is gone

pub mod cookies;
pub mod manager;
pub mod store;

pub use cookies::capture_session_cookie;
pub use manager::{ConnectOutcome, SessionManager, SESSION_RESOURCE};
pub use store::SessionStore;
