//! An HTTP ping service whose routes are guarded by per-identity quotas.
//!
//! Four routes combine the two limiting algorithms with two ways of naming
//! the caller: the `X-API-Key` header or the peer IP address.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::Limiters;
use crate::config::Settings;

mod app;
mod config;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config)?;
    let limiters = Limiters::from_settings(&settings).await?;
    let app = app::router(&limiters);

    let server = &settings.server;
    let listener = TcpListener::bind((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", server.host, server.port))?;
    info!(addr = %listener.local_addr()?, store = ?settings.store, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
