//! Sluice - streaming storage gateway

use clap::Parser;
use sluice_gateway::{run_server_with_shutdown, GatewayConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(about = "Streaming CRUD gateway for cloud storage backends")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, env = "SLUICE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SLUICE_PORT")]
    port: Option<u16>,

    /// Webhook URL receiving create/update/delete events
    #[arg(long, env = "SLUICE_HOOK_URL")]
    hook_url: Option<String>,

    /// Mount an in-memory provider at /memory/ (data will not persist)
    #[arg(long, env = "SLUICE_MEMORY_STORE")]
    memory_store: bool,

    /// Enable debug logging
    #[arg(short, long, env = "SLUICE_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "sluice_gateway={log_level},sluice_providers={log_level},sluice_core={log_level},tower_http=debug"
            )
            .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.hook_url.is_some() {
        config.hook_url = args.hook_url;
    }
    if args.memory_store {
        config.use_memory_store = true;
    }

    tracing::info!("Starting Sluice gateway on {}", config.bind_addr());
    if config.hook_url.is_none() {
        tracing::info!("No hook URL configured; hook events are logged only");
    }

    run_server_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await
}
