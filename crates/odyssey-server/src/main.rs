//! Binary entry point: CLI parsing, tracing bootstrap, server startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use odyssey_ai::{OpenAiClient, OpenAiConfig};
use odyssey_gateway::{run_gateway_server, GatewayConfig, DEFAULT_SYSTEM_PROMPT};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "odyssey-server",
    about = "Conversational gateway for the Audio Odyssey album club",
    version
)]
struct Cli {
    /// Address the gateway binds to.
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: SocketAddr,

    /// Directory holding the albums/ratings/backlog JSON files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Model forwarded to the provider on every chat turn.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "ODYSSEY_API_BASE")]
    api_base: Option<String>,

    /// Provider API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// System instruction given to the orchestrator.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Upper bound on model round-trips within one chat turn.
    #[arg(long, default_value_t = 8, value_parser = parse_positive_usize)]
    max_turns: usize,

    /// Token cap forwarded to the provider, when set.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature forwarded to the provider, when set.
    #[arg(long)]
    temperature: Option<f32>,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut ai_config = OpenAiConfig {
        api_key: cli.api_key.unwrap_or_default(),
        ..OpenAiConfig::default()
    };
    if let Some(api_base) = cli.api_base {
        ai_config.api_base = api_base;
    }
    let client = OpenAiClient::new(ai_config)
        .context("failed to construct provider client (is OPENAI_API_KEY set?)")?;

    let config = GatewayConfig {
        client: Arc::new(client),
        model: cli.model,
        system_prompt: cli
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        data_dir: cli.data_dir,
        max_turns: cli.max_turns,
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
    };

    run_gateway_server(config, cli.bind).await
}
