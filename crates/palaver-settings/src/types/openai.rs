//! Azure OpenAI deployment settings.

use serde::{Deserialize, Serialize};

/// Upstream chat completion deployment and default sampling parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenAiSettings {
    /// `api-key` header value.
    pub api_key: String,
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub api_base: String,
    /// `api-version` query parameter.
    pub api_version: String,
    /// Chat model deployment.
    pub deployment_name: String,
    /// Default temperature.
    pub temperature: f32,
    /// Default token cap.
    pub max_tokens: u32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Frequency penalty.
    pub frequency_penalty: f32,
    /// Presence penalty.
    pub presence_penalty: f32,
    /// System prompt prepended to every conversation.
    pub system_prompt: String,
    /// Seconds to wait for the upstream response headers.
    pub request_timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: String::new(),
            api_version: "2024-05-01-preview".to_string(),
            deployment_name: String::new(),
            temperature: 0.7,
            max_tokens: 4000,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            system_prompt: "You are a helpful assistant.".to_string(),
            request_timeout_secs: 60,
        }
    }
}
