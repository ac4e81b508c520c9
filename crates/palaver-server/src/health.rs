//! `/health` endpoint.

use serde::Serialize;
use tokio::time::Instant;

use crate::registry::ConnectionInfo;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the server is running.
    pub status: String,
    /// Configured application name.
    pub app_name: String,
    /// Deployment environment.
    pub environment: String,
    /// Whether completions are grounded on a search index.
    pub vector_search_enabled: bool,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Session summary.
    pub connections: ConnectionInfo,
}

/// Static facts reported alongside live counters.
#[derive(Debug, Clone)]
pub struct HealthInfo {
    /// Application name.
    pub app_name: String,
    /// Deployment environment.
    pub environment: String,
    /// Whether vector search is on.
    pub vector_search_enabled: bool,
}

/// Build a health response.
pub fn health_check(info: &HealthInfo, start_time: Instant, connections: ConnectionInfo) -> HealthResponse {
    HealthResponse {
        status: "healthy".into(),
        app_name: info.app_name.clone(),
        environment: info.environment.clone(),
        vector_search_enabled: info.vector_search_enabled,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn info() -> HealthInfo {
        HealthInfo {
            app_name: "AI Chat Assistant".into(),
            environment: "test".into(),
            vector_search_enabled: true,
        }
    }

    fn empty_connections() -> ConnectionInfo {
        ConnectionInfo {
            total_connections: 0,
            max_connections: 100,
            clients: Vec::new(),
        }
    }

    #[test]
    fn status_is_healthy() {
        let resp = health_check(&info(), Instant::now(), empty_connections());
        assert_eq!(resp.status, "healthy");
        assert_eq!(resp.app_name, "AI Chat Assistant");
        assert!(resp.vector_search_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_increases() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(60)).await;
        let resp = health_check(&info(), start, empty_connections());
        assert_eq!(resp.uptime_secs, 60);
    }

    #[test]
    fn serialization() {
        let resp = health_check(&info(), Instant::now(), empty_connections());
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "healthy");
        assert_eq!(parsed["environment"], "test");
        assert_eq!(parsed["connections"]["max_connections"], 100);
        assert!(parsed["connections"]["clients"].as_array().unwrap().is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(parsed["timestamp"].as_str().unwrap()).is_ok());
    }
}
