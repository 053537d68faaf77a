//! # flux-telemetry
//!
//! Logging and metrics bootstrap shared by every Flux binary.
//!
//! - [`init_logging`] installs a `tracing` subscriber with an [`EnvFilter`]
//!   built from [`LoggingSettings`]; `RUST_LOG` always wins.
//! - [`metrics`] installs the Prometheus recorder and names every metric the
//!   relay records, so producers and dashboards agree on spelling.
//!
//! [`EnvFilter`]: tracing_subscriber::EnvFilter
//! [`LoggingSettings`]: flux_settings::LoggingSettings

#![deny(unsafe_code)]

mod logging;
pub mod metrics;

pub use logging::{filter_directives, init_logging};
