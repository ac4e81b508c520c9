//! Server configuration.

use std::time::Duration;

use palaver_core::{DEFAULT_FLUSH_THRESHOLD, GenerationParams};
use serde::{Deserialize, Serialize};

/// Shortest period the sweeper and ping timers run with. Zero would panic the timer.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_secs(1);

/// Configuration for the palaver server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Session age in seconds after which the sweeper disconnects it.
    pub session_timeout_secs: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per client before senders wait.
    pub outbound_buffer: usize,
    /// Allowed browser origins; `*` matches any run of non-slash characters.
    pub cors_origins: Vec<String>,
    /// Name reported by `/health`.
    pub app_name: String,
    /// Environment reported by `/health`.
    pub environment: String,
    /// Whether completions are grounded on a search index (reported by `/health`).
    pub vector_search_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 100,
            session_timeout_secs: 600,
            sweep_interval_secs: 30,
            ping_interval_secs: 30,
            max_message_size: 1024 * 1024, // 1 MB
            outbound_buffer: 256,
            cors_origins: Vec::new(),
            app_name: "AI Chat Assistant".into(),
            environment: "production".into(),
            vector_search_enabled: false,
        }
    }
}

impl ServerConfig {
    /// Session timeout as a `Duration`.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs).max(MIN_TIMER_PERIOD)
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs).max(MIN_TIMER_PERIOD)
    }
}

/// Defaults applied to every generation.
#[derive(Clone, Debug)]
pub struct StreamDefaults {
    /// System prompt prepended when the request does not supply one.
    pub system_prompt: String,
    /// Sampling parameters when the request does not override them.
    pub params: GenerationParams,
    /// Characters that force a flush while streaming.
    pub flush_threshold: usize,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".into(),
            params: GenerationParams::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}
