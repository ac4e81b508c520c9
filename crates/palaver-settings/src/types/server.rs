//! Application, server and session-layer settings.

use serde::{Deserialize, Serialize};

/// Application identity reported by `/health`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Display name.
    pub name: String,
    /// Deployment environment label.
    pub environment: String,
    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "AI Chat Assistant".to_string(),
            environment: "production".to_string(),
            debug: false,
        }
    }
}

/// Network binding and CORS.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed browser origins. Entries may contain `*` wildcards.
    pub cors_origins: Vec<String>,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
                "https://*.azurestaticapps.net".to_string(),
            ],
            max_message_size: 1024 * 1024,
        }
    }
}

/// Session registry and streaming tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Concurrent session cap.
    pub max_connections: usize,
    /// Session age, in seconds, after which the sweeper disconnects it.
    pub session_timeout_secs: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Characters that force a flush while streaming.
    pub flush_threshold: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            session_timeout_secs: 600,
            sweep_interval_secs: 30,
            flush_threshold: 50,
            ping_interval_secs: 30,
        }
    }
}
