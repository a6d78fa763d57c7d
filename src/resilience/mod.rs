//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (deadline on every upstream call)
//!     → On 404: retries.rs (reconnect the session, resend once)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only session rejections are retried; transport errors surface as 503

pub mod retries;
pub mod timeouts;

pub use retries::{RetryController, RetryPolicy, SESSION_REJECTED};
