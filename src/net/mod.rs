//! Network layer subsystem.
//!
//! Plain listeners are bound by [`crate::lifecycle::startup`]; this module
//! only prepares TLS termination for the listener side.

pub mod tls;
