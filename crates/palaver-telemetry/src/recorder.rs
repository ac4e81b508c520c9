//! Prometheus metrics recorder and metric names.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Metrics setup failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The global recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Recorder(#[from] BuildError),
}

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Register help text and units for every metric.
pub fn describe_metrics() {
    describe_counter!(names::WS_CONNECTIONS_TOTAL, "Accepted WebSocket connections");
    describe_counter!(names::WS_REJECTED_TOTAL, "Connections refused at capacity");
    describe_counter!(names::WS_DISCONNECTIONS_TOTAL, "Session disconnects");
    describe_gauge!(names::SESSIONS_ACTIVE, "Registered sessions");
    describe_histogram!(
        names::WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "Lifetime of a WebSocket connection"
    );
    describe_counter!(names::SWEEP_RUNS_TOTAL, "Sweeper cycles");
    describe_counter!(names::SWEEP_EXPIRED_TOTAL, "Sessions removed by the sweeper");
    describe_counter!(names::GENERATIONS_TOTAL, "Generations by outcome");
    describe_gauge!(names::GENERATIONS_ACTIVE, "Running generation tasks");
    describe_counter!(names::FRAGMENTS_TOTAL, "Upstream fragments consumed");
    describe_counter!(names::FRAMES_TOTAL, "Frames written to clients");
    describe_counter!(names::UPSTREAM_ERRORS_TOTAL, "Upstream failures by kind");
    describe_histogram!(
        names::GENERATION_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of one generation"
    );
    describe_counter!(names::PROTOCOL_ERRORS_TOTAL, "Rejected client messages");
}

/// Metric name constants to avoid typos across crates.
pub mod names {
    /// WebSocket connections accepted (counter).
    pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
    /// WebSocket connections rejected at capacity (counter).
    pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
    /// Session disconnects (counter, labels: reason).
    pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
    /// Registered sessions (gauge).
    pub const SESSIONS_ACTIVE: &str = "sessions_active";
    /// Connection lifetime seconds (histogram).
    pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
    /// Sweeper cycles (counter).
    pub const SWEEP_RUNS_TOTAL: &str = "sweep_runs_total";
    /// Sessions expired by the sweeper (counter, labels: reason).
    pub const SWEEP_EXPIRED_TOTAL: &str = "sweep_expired_total";
    /// Generations finished (counter, labels: outcome).
    pub const GENERATIONS_TOTAL: &str = "generations_total";
    /// Running generation tasks (gauge).
    pub const GENERATIONS_ACTIVE: &str = "generations_active";
    /// Upstream fragments consumed (counter).
    pub const FRAGMENTS_TOTAL: &str = "fragments_total";
    /// Frames written to clients (counter).
    pub const FRAMES_TOTAL: &str = "frames_total";
    /// Upstream errors (counter, labels: kind).
    pub const UPSTREAM_ERRORS_TOTAL: &str = "upstream_errors_total";
    /// Generation wall time seconds (histogram).
    pub const GENERATION_DURATION_SECONDS: &str = "generation_duration_seconds";
    /// Rejected client messages (counter, labels: kind).
    pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";
}
