//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape listener (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID is attached to every event on the request path
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
