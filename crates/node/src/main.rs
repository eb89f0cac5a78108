//! Reference flowlink node.
//!
//! Usage:
//!   flowlink-node --config flowlink.toml [--port 10003]
//!
//! Env vars:
//!   FLOWLINK_CONFIG  config path when `--config` is not given
//!   RUST_LOG         log filter (default: "info,fl_node=debug")

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use fl_domain::config::Config;
use fl_node::NodeServer;

/// Reference flowlink RPC node.
#[derive(Debug, Parser)]
#[command(name = "flowlink-node", version, about)]
struct Cli {
    /// Path to the TOML config file. Missing files fall back to defaults.
    #[arg(long, env = "FLOWLINK_CONFIG", default_value = "flowlink.toml")]
    config: String,
    /// Override `node.server.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fl_node=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?
        .node;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if config.users.is_empty() {
        tracing::warn!("no RPC users configured, every login will be rejected");
    }

    let node = NodeServer::start(config).await.context("starting node")?;
    tracing::info!(url = %node.ws_url(), "ready");

    shutdown_signal().await;
    node.shutdown().await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
