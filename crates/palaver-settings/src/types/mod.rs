//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! settings file only needs the keys it changes.

mod logging;
mod openai;
mod search;
mod server;

pub use logging::{LogFormat, LoggingSettings};
pub use openai::OpenAiSettings;
pub use search::VectorSearchSettings;
pub use server::{AppSettings, ServerSettings, SessionSettings};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PalaverSettings {
    /// Application identity.
    pub app: AppSettings,
    /// Network binding and CORS.
    pub server: ServerSettings,
    /// Session layer tuning.
    pub session: SessionSettings,
    /// Upstream Azure OpenAI deployment.
    pub openai: OpenAiSettings,
    /// Optional Azure AI Search grounding.
    pub vector_search: VectorSearchSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PalaverSettings {
    /// Check required values and normalize optional features.
    ///
    /// Missing OpenAI credentials are an error, as is any session limit of
    /// zero. Vector search that is enabled without an endpoint, key and index
    /// is switched off with a warning.
    pub fn validate(&mut self) -> Result<()> {
        let required = [
            ("OPENAI_API_KEY", &self.openai.api_key),
            ("OPENAI_API_BASE", &self.openai.api_base),
            ("OPENAI_DEPLOYMENT_NAME", &self.openai.deployment_name),
        ];
        if let Some(&(name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(SettingsError::MissingCredential(name));
        }
        if self.session.max_connections == 0 {
            return Err(SettingsError::NoCapacity);
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(SettingsError::ZeroInterval("sweepIntervalSecs"));
        }
        if self.session.ping_interval_secs == 0 {
            return Err(SettingsError::ZeroInterval("pingIntervalSecs"));
        }

        if self.vector_search.enabled {
            let missing = self.vector_search.missing_fields();
            if missing.is_empty() {
                info!(index = %self.vector_search.index, "vector search enabled");
            } else {
                warn!(
                    missing = %missing.join(", "),
                    "vector search is enabled but incomplete, disabling"
                );
                self.vector_search.enabled = false;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> PalaverSettings {
        let mut s = PalaverSettings::default();
        s.openai.api_key = "key".into();
        s.openai.api_base = "https://example.openai.azure.com".into();
        s.openai.deployment_name = "gpt-4o".into();
        s
    }

    #[test]
    fn defaults_serialize_camel_case() {
        let json = serde_json::to_value(PalaverSettings::default()).unwrap();
        assert!(json.get("vectorSearch").is_some());
        assert!(json["session"].get("maxConnections").is_some());
        assert!(json["openai"].get("apiVersion").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: PalaverSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.session.max_connections, 100);
    }

    #[test]
    fn validate_requires_openai_key() {
        let mut s = configured();
        s.openai.api_key = String::new();
        let err = s.validate().unwrap_err();
        assert!(matches!(err, SettingsError::MissingCredential("OPENAI_API_KEY")));
    }

    #[test]
    fn validate_requires_deployment() {
        let mut s = configured();
        s.openai.deployment_name = "  ".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("OPENAI_DEPLOYMENT_NAME"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut s = configured();
        s.session.max_connections = 0;
        assert!(matches!(s.validate(), Err(SettingsError::NoCapacity)));
    }

    #[test]
    fn validate_rejects_zero_intervals_from_file() {
        let mut s: PalaverSettings =
            serde_json::from_str(r#"{"session": {"sweepIntervalSecs": 0}}"#).unwrap();
        s.openai = configured().openai;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ZeroInterval("sweepIntervalSecs"))
        ));

        let mut s = configured();
        s.session.ping_interval_secs = 0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ZeroInterval("pingIntervalSecs"))
        ));
    }

    #[test]
    fn validate_passes_when_configured() {
        let mut s = configured();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn incomplete_vector_search_disabled() {
        let mut s = configured();
        s.vector_search.enabled = true;
        s.vector_search.endpoint = "https://search.example".into();
        s.validate().unwrap();
        assert!(!s.vector_search.enabled);
    }

    #[test]
    fn complete_vector_search_stays_enabled() {
        let mut s = configured();
        s.vector_search.enabled = true;
        s.vector_search.endpoint = "https://search.example".into();
        s.vector_search.key = "k".into();
        s.vector_search.index = "docs".into();
        s.validate().unwrap();
        assert!(s.vector_search.enabled);
    }
}
