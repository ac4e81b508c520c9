//! # palaver-telemetry
//!
//! Logging and metrics plumbing shared by the server and the binary.
//!
//! - [`init_subscriber`]: global `tracing` subscriber (compact or JSON, stderr)
//! - [`install_recorder`]: global Prometheus recorder for the `metrics` facade
//! - [`names`]: metric name constants

#![deny(unsafe_code)]

mod logging;
mod recorder;

pub use logging::{TelemetryConfig, init_subscriber};
pub use recorder::{TelemetryError, describe_metrics, install_recorder, names, render};
