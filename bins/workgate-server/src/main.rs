use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workgate_api::{create_router, AppState};
use workgate_config::AppConfig;

/// Workgate scheduler server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for the SQLite stores
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting workgate server");

    let mut config = AppConfig::from_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.into();
    }

    let (state, history_writer) = AppState::build(config.clone()).await?;
    let shutdown = install_shutdown_handler();

    // Background workers: history writer, sampler, reaper, daily prune.
    let writer_handle = tokio::spawn(history_writer.run(shutdown.clone()));
    let sampler_handle = tokio::spawn(state.sampler.clone().run(shutdown.clone()));
    let reaper_handle = state.engine.spawn_reaper(shutdown.clone());
    let prune_handle = spawn_history_prune(state.clone(), shutdown.clone());

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Let every background task drain before the process exits.
    shutdown.cancel();
    let _ = tokio::join!(writer_handle, sampler_handle, reaper_handle, prune_handle);
    info!("shutdown complete");
    Ok(())
}

/// Cancel the returned token on SIGTERM or SIGINT.
fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        handler_token.cancel();
    });

    token
}

/// Daily job-history retention pass, plus one at startup.
fn spawn_history_prune(state: AppState, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let days = state.config.storage.history_retention_days as i64;
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = state.history.cleanup(days, chrono::Utc::now()).await {
                        tracing::warn!(error = %err, "history retention pass failed");
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    })
}
