//! Axum server: router, shared state and the listener lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use palaver_core::{CompletionProvider, SessionId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{ServerConfig, StreamDefaults};
use crate::coordinator::StreamCoordinator;
use crate::cors::cors_layer;
use crate::health::{self, HealthInfo, HealthResponse};
use crate::registry::{RegistryConfig, SessionRegistry};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::ws::{ConnectionOptions, run_ws_session};

/// Time allowed for the listener to drain after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state passed to handlers.
#[derive(Clone)]
pub struct AppState {
    /// Generation driver (owns the registry).
    pub coordinator: Arc<StreamCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server start time for uptime.
    pub start_time: Instant,
}

/// The palaver HTTP/WebSocket server.
pub struct PalaverServer {
    state: AppState,
}

impl PalaverServer {
    /// Build a server around `provider`.
    pub fn new(
        config: ServerConfig,
        provider: Arc<dyn CompletionProvider>,
        defaults: StreamDefaults,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = SessionRegistry::new(RegistryConfig {
            max_connections: config.max_connections,
            session_timeout: config.session_timeout(),
            sweep_interval: config.sweep_interval(),
        });
        let coordinator = Arc::new(StreamCoordinator::new(registry, provider, defaults));
        Self {
            state: AppState {
                coordinator,
                config: Arc::new(config),
                metrics,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        }
    }

    /// Routes: `/ws`, `/health`, `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(cors_layer(&self.state.config.cors_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `host:port` and serve in a background task.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let token = self.state.shutdown.token();
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let join = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server exited with error");
            }
        });

        info!(
            addr = %local_addr,
            max_connections = self.state.config.max_connections,
            "palaver server listening"
        );

        Ok(ServerHandle {
            addr: local_addr,
            join,
            shutdown: self.state.shutdown.clone(),
            registry: self.state.coordinator.registry().clone(),
        })
    }

    /// Generation driver.
    pub fn coordinator(&self) -> &Arc<StreamCoordinator> {
        &self.state.coordinator
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.state.coordinator.registry()
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// A running listener.
pub struct ServerHandle {
    /// Bound address (useful with port 0).
    pub addr: SocketAddr,
    join: JoinHandle<()>,
    shutdown: Arc<ShutdownCoordinator>,
    registry: Arc<SessionRegistry>,
}

impl ServerHandle {
    /// Stop accepting, close every session with 1001 and wait for the listener.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self
            .shutdown
            .drain(&self.registry, self.join, SHUTDOWN_TIMEOUT)
            .await;
        info!(
            sessions_closed = report.sessions_closed,
            listener_drained = report.listener_drained,
            "server stopped"
        );
        report
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let options = ConnectionOptions {
        outbound_buffer: state.config.outbound_buffer,
        ping_interval: state.config.ping_interval(),
    };
    let coordinator = state.coordinator.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, SessionId::from_addr(addr), coordinator, options)
        })
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = HealthInfo {
        app_name: state.config.app_name.clone(),
        environment: state.config.environment.clone(),
        vector_search_enabled: state.config.vector_search_enabled,
    };
    let connections = state.coordinator.registry().connection_info().await;
    Json(health::health_check(&info, state.start_time, connections))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        palaver_telemetry::render(&state.metrics),
    )
}
