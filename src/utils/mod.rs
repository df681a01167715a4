//! Shared utilities
//!
//! - [`logging`]: tracing subscriber setup and the [`log_component!`](crate::log_component) macro

pub mod logging;
