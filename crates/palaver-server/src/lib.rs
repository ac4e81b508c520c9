//! # palaver-server
//!
//! Axum HTTP + `WebSocket` server for streaming chat sessions.
//!
//! - Session registry: capacity limit, identity replacement, one generation per session
//! - Stream coordinator: upstream fragments through a chunk buffer to the client
//! - Background sweeper for disconnected and timed-out sessions
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod cors;
pub mod generation;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod socket;
pub mod sweeper;
pub mod ws;

pub use config::{ServerConfig, StreamDefaults};
pub use coordinator::{StreamCoordinator, StreamMetrics};
pub use generation::{GenerationContext, GenerationOutcome, GenerationTicket};
pub use registry::{ClientInfo, ConnectionInfo, RegistryConfig, SessionRegistry, SweepReport};
pub use server::{AppState, PalaverServer, ServerHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use socket::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ClientSocket};
pub use ws::STOPPED_NOTICE;
