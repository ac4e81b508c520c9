//! # palaver
//!
//! Server binary: loads settings, wires the Azure OpenAI provider into the
//! session server and runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use palaver_llm::{AzureOpenAiConfig, AzureOpenAiProvider, AzureSearchSource};
use palaver_server::{PalaverServer, ServerConfig, StreamDefaults};
use palaver_settings::{LogFormat, PalaverSettings};
use palaver_telemetry::TelemetryConfig;

/// Streaming chat gateway.
#[derive(Parser, Debug)]
#[command(name = "palaver", about = "Streaming chat gateway")]
struct Cli {
    /// JSON settings file merged over defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent sessions (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Skip the startup probe against the completion deployment.
    #[arg(long)]
    skip_validation: bool,
}

impl Cli {
    fn apply(&self, settings: &mut PalaverSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.session.max_connections = max;
        }
    }
}

fn server_config(settings: &PalaverSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_connections: settings.session.max_connections,
        session_timeout_secs: settings.session.session_timeout_secs,
        sweep_interval_secs: settings.session.sweep_interval_secs,
        ping_interval_secs: settings.session.ping_interval_secs,
        max_message_size: settings.server.max_message_size,
        cors_origins: settings.server.cors_origins.clone(),
        app_name: settings.app.name.clone(),
        environment: settings.app.environment.clone(),
        vector_search_enabled: settings.vector_search.enabled,
        ..ServerConfig::default()
    }
}

fn stream_defaults(settings: &PalaverSettings) -> StreamDefaults {
    let openai = &settings.openai;
    StreamDefaults {
        system_prompt: openai.system_prompt.clone(),
        params: palaver_core::GenerationParams {
            max_tokens: openai.max_tokens,
            temperature: openai.temperature,
            top_p: openai.top_p,
            frequency_penalty: openai.frequency_penalty,
            presence_penalty: openai.presence_penalty,
        },
        flush_threshold: settings.session.flush_threshold,
    }
}

fn provider_config(settings: &PalaverSettings) -> AzureOpenAiConfig {
    let openai = &settings.openai;
    let search = &settings.vector_search;
    AzureOpenAiConfig {
        api_base: openai.api_base.clone(),
        api_key: openai.api_key.clone(),
        api_version: openai.api_version.clone(),
        deployment: openai.deployment_name.clone(),
        request_timeout: Duration::from_secs(openai.request_timeout_secs),
        search: search.enabled.then(|| AzureSearchSource {
            endpoint: search.endpoint.clone(),
            key: search.key.clone(),
            index: search.index.clone(),
            semantic_config: search.semantic_config.clone(),
            embedding_deployment: search.embedding_deployment.clone(),
            role_information: openai.system_prompt.clone(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = palaver_settings::load_settings_from_path(args.config.as_deref())
        .context("Failed to load settings")?;
    args.apply(&mut settings);

    palaver_telemetry::init_subscriber(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.format == LogFormat::Json,
    });

    settings.validate().context("Invalid settings")?;
    let metrics = palaver_telemetry::install_recorder().context("Failed to install metrics")?;

    let provider = AzureOpenAiProvider::new(provider_config(&settings))
        .context("Failed to build completion provider")?;
    if args.skip_validation {
        tracing::warn!("skipping completion deployment validation");
    } else {
        provider
            .validate()
            .await
            .context("Completion deployment validation failed")?;
    }

    tracing::info!(
        app = %settings.app.name,
        environment = %settings.app.environment,
        deployment = %settings.openai.deployment_name,
        vector_search = settings.vector_search.enabled,
        "starting palaver"
    );

    let server = PalaverServer::new(
        server_config(&settings),
        Arc::new(provider),
        stream_defaults(&settings),
        metrics,
    );
    let handle = server.listen().await.context("Failed to bind listener")?;
    tracing::info!(addr = %handle.addr, "palaver ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
