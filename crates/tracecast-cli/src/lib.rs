use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tracecast_runtime::{RelayConfig, RelayService, build_publishers, resolve_state_dir};

/// Relay live agent transcript files to chat destinations and SSE clients.
#[derive(Debug, Parser)]
#[command(name = "tracecast", version, about)]
pub struct Cli {
    /// Address to bind the HTTP surface to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the HTTP surface
    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    /// Path to the YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for persisted session state
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Log filter (error, warn, info, debug, trace, or an env-filter spec)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing(&cli.log_level)?;

    let state_dir = resolve_state_dir(cli.state_dir.as_deref())?;
    let config_path = match cli.config {
        Some(path) => path,
        None => state_dir.join("config.yaml"),
    };

    let config = RelayConfig::load_from(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let publishers = build_publishers(&config).context("building destination publishers")?;
    if publishers.is_empty() {
        info!("no platform credentials configured; only SSE delivery is available");
    }

    let service = RelayService::start(
        config,
        config_path,
        state_dir.join("sessions"),
        publishers,
    )
    .context("starting relay service")?;

    let app = tracecast_server::router(service.clone());
    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("binding {}:{}", cli.host, cli.port))?;
    info!(address = %listener.local_addr()?, "listening");

    axum_serve(listener, app).await?;

    // The HTTP surface is down; drain the pipeline and persist state.
    service.shutdown().await;
    Ok(())
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log filter: {}", log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
