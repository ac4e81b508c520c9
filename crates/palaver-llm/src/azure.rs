//! Azure OpenAI streaming chat completions.
//!
//! `POST {base}/openai/deployments/{deployment}/chat/completions?api-version=…`
//! with `stream: true`. The body comes back as SSE; each `data:` line is a
//! `chat.completion.chunk` whose first choice carries a text delta and, on the
//! last chunk, a `finish_reason`. Chunks without choices (Azure's
//! `prompt_filter_results` preamble) are skipped.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use palaver_core::{
    CompletionProvider, FinishReason, FragmentStream, GenerationParams, PromptMessage,
    TokenFragment, UpstreamError,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::sse::parse_sse_lines;

/// Prompt used by [`AzureOpenAiProvider::validate`].
const PROBE_PROMPT: &str = "test";

/// Documents retrieved per query when search grounding is on.
const SEARCH_TOP_N_DOCUMENTS: u32 = 5;

/// Retrieval strictness (1–5) when search grounding is on.
const SEARCH_STRICTNESS: u32 = 3;

/// Connection settings for one chat deployment.
#[derive(Clone, Debug)]
pub struct AzureOpenAiConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub api_base: String,
    /// `api-key` header value.
    pub api_key: String,
    /// `api-version` query parameter.
    pub api_version: String,
    /// Chat model deployment name.
    pub deployment: String,
    /// How long to wait for response headers.
    pub request_timeout: Duration,
    /// Azure AI Search grounding, if enabled.
    pub search: Option<AzureSearchSource>,
}

/// Azure AI Search data source attached to each completion.
#[derive(Clone, Debug)]
pub struct AzureSearchSource {
    /// Search service endpoint.
    pub endpoint: String,
    /// Search key.
    pub key: String,
    /// Index name.
    pub index: String,
    /// Semantic ranker configuration.
    pub semantic_config: String,
    /// Embedding deployment for vector queries.
    pub embedding_deployment: String,
    /// System prompt forwarded as `role_information`.
    pub role_information: String,
}

impl AzureSearchSource {
    fn to_data_source(&self) -> Value {
        json!({
            "type": "azure_search",
            "parameters": {
                "endpoint": self.endpoint,
                "index_name": self.index,
                "semantic_configuration": self.semantic_config,
                "query_type": "vector_simple_hybrid",
                "in_scope": true,
                "role_information": self.role_information,
                "strictness": SEARCH_STRICTNESS,
                "top_n_documents": SEARCH_TOP_N_DOCUMENTS,
                "authentication": {
                    "type": "api_key",
                    "key": self.key,
                },
                "embedding_dependency": {
                    "type": "deployment_name",
                    "deployment_name": self.embedding_deployment,
                },
            }
        })
    }
}

/// Provider for one Azure OpenAI chat deployment.
pub struct AzureOpenAiProvider {
    config: AzureOpenAiConfig,
    client: reqwest::Client,
}

impl AzureOpenAiProvider {
    /// Build a provider. Fails if required configuration is blank.
    pub fn new(config: AzureOpenAiConfig) -> Result<Self, UpstreamError> {
        for (name, value) in [
            ("api_base", &config.api_base),
            ("api_key", &config.api_key),
            ("deployment", &config.deployment),
        ] {
            if value.trim().is_empty() {
                return Err(UpstreamError::NotConfigured(format!("{name} is empty")));
            }
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| UpstreamError::NotConfigured(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Full completions URL for the configured deployment.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version,
        )
    }

    /// Request body for a completion.
    pub fn build_request(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "frequency_penalty": params.frequency_penalty,
            "presence_penalty": params.presence_penalty,
            "stream": stream,
        });
        if let Some(search) = &self.config.search {
            body["data_sources"] = json!([search.to_data_source()]);
        }
        body
    }

    /// Startup probe: a tiny non-streaming completion.
    pub async fn validate(&self) -> Result<(), UpstreamError> {
        let params = GenerationParams {
            max_tokens: 10,
            ..GenerationParams::default()
        };
        let body = self.build_request(&[PromptMessage::user(PROBE_PROMPT)], &params, false);
        let response = self.send(&body).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;
        if value.get("choices").and_then(Value::as_array).is_none() {
            return Err(UpstreamError::MalformedResponse(
                "completion response has no choices".into(),
            ));
        }
        info!(deployment = %self.config.deployment, "azure openai configuration validated");
        Ok(())
    }

    fn headers(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| UpstreamError::NotConfigured("api key is not a valid header value".into()))?;
        let _ = headers.insert("api-key", key);
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        Ok(headers)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let request = self
            .client
            .post(self.completions_url())
            .headers(self.headers()?)
            .json(body)
            .send();

        let response = tokio::time::timeout(self.config.request_timeout, request)
            .await
            .map_err(|_| {
                UpstreamError::NetworkError(format!(
                    "no response within {}s",
                    self.config.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| UpstreamError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body_text = response.text().await.unwrap_or_default();
        let message = parse_api_error(&body_text);
        warn!(status = status.as_u16(), %message, "azure openai request failed");

        Err(match UpstreamError::from_status(status.as_u16(), message) {
            UpstreamError::RateLimited { .. } => UpstreamError::RateLimited { retry_after },
            other => other,
        })
    }
}

#[async_trait]
impl CompletionProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure-openai"
    }

    async fn stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<FragmentStream, UpstreamError> {
        debug!(
            deployment = %self.config.deployment,
            message_count = messages.len(),
            search = self.config.search.is_some(),
            "starting azure openai stream"
        );
        let body = self.build_request(messages, params, true);
        let response = self.send(&body).await?;

        let fragments = parse_sse_lines(Box::pin(response.bytes_stream())).filter_map(|item| async move {
            match item {
                Ok(data) => parse_chunk(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(fragments))
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Turn one SSE payload into a fragment.
///
/// `Ok(None)` for payloads that carry no text and no finish marker. A payload
/// that is not JSON, or an in-band `error` object, ends the stream with an error.
fn parse_chunk(data: &str) -> Result<Option<TokenFragment>, UpstreamError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| UpstreamError::MalformedResponse(format!("completion chunk: {e}")))?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream reported an error")
            .to_string();
        return Err(UpstreamError::StreamInterrupted(message));
    }

    let chunk: ChatCompletionChunk = serde_json::from_value(value)
        .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let text = choice.delta.and_then(|d| d.content).unwrap_or_default();
    let finish_reason = choice.finish_reason.as_deref().map(FinishReason::parse);
    if text.is_empty() && finish_reason.is_none() {
        return Ok(None);
    }
    Ok(Some(TokenFragment {
        text,
        finish_reason,
    }))
}

/// Extract `error.message` from an Azure error body, falling back to the raw text.
fn parse_api_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
