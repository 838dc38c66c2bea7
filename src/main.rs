//! Fetcher Binary Entry Point
//!
//! Runs the polling registry behind the REST API.
//! Core functionality is provided by the `fetcher` library crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fetcher::{
    HttpExecutor, Registry,
    config::AppConfig,
    server::{self, AppState},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fetcher - periodic URL polling service
#[derive(Parser, Debug)]
#[command(name = "fetcher", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, env = "FETCHER_CONFIG")]
    config: Option<String>,

    /// Server bind address (overrides config file)
    #[arg(long, env = "FETCHER_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "FETCHER_SERVER_PORT")]
    server_port: Option<u16>,

    /// Fetch timeout, e.g. "5s" (overrides config file)
    #[arg(long, env = "FETCHER_FETCH_TIMEOUT", value_parser = humantime::parse_duration)]
    fetch_timeout: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fetcher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Fetcher v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(timeout) = cli.fetch_timeout {
        config.fetch.timeout = timeout;
    }
    config.validate()?;

    let executor = HttpExecutor::new(config.fetch.timeout)?;
    tracing::info!(
        "Server: {}:{}, fetch timeout: {:?}, history retention: {:?}",
        config.server.bind,
        config.server.port,
        executor.timeout(),
        config.history.retention(),
    );

    let registry = Registry::new(Arc::new(executor)).with_retention(config.history.retention());

    // Seed targets from the config file, in order
    for spec in config.seed_specs() {
        let url = spec.url.clone();
        match registry.register(spec).await {
            Ok(id) => tracing::info!("Seeded target {} ({})", id, url),
            Err(e) => tracing::error!("Failed to seed target '{}': {}", url, e),
        }
    }

    let mut app_state = AppState::new(registry);
    app_state.max_body_bytes = config.server.max_body_bytes;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    server::serve(listener, app_state, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
