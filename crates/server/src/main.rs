//! Parcel upload server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::config::AppConfig;
use parcel_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parcel - resumable, content-addressed upload server
#[derive(Parser, Debug)]
#[command(name = "parceld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PARCEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Layer the optional TOML file under `PARCEL_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PARCEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Parcel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    parcel_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = parcel_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let state = AppState::new(config.clone(), storage);
    state
        .sessions
        .restore()
        .await
        .context("failed to restore upload state")?;

    match state.spawn_sweeper() {
        Some(_) => tracing::info!(
            interval_secs = config.upload.sweep_interval_secs,
            ttl_secs = config.upload.session_ttl_secs,
            "Session sweeper spawned"
        ),
        None => tracing::info!("Session sweeping disabled"),
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
