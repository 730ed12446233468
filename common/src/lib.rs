//! Ambient utilities shared by the chime agent binaries.
//!
//! Tracing setup, CLI color policy and the Prometheus metrics registry live
//! here so every binary behaves the same way.

pub mod cli;
pub mod observability;

pub use cli::ColorWhen;
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
