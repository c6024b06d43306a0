//! Exporter binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongodb_exporter::config::AppConfig;
use mongodb_exporter::manager::ConnectionManager;
use mongodb_exporter::metrics::ExporterMetrics;
use mongodb_exporter::mongo::MongoConnector;
use mongodb_exporter::server::{create_router, AppState};

/// Deadline for draining the manager and in-flight scrapes on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// MongoDB query exporter for Prometheus
#[derive(Parser, Debug)]
#[command(name = "mongodb_exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "config.yaml",
        env = "MONGODB_EXPORTER_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "HTTP_BIND")]
    bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "HTTP_PORT")]
    port: Option<u16>,

    /// MongoDB connection URI (overrides config file)
    #[arg(long, env = "MONGODB_URI")]
    mongodb_uri: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mongodb_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file).
    if let Some(bind) = cli.bind {
        config.http.bind = bind;
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    if let Some(uri) = cli.mongodb_uri {
        config.mongodb.uri = uri;
    }
    config.validate()?;

    tracing::info!(
        "Exporting {} metrics from {} on {}:{}",
        config.metrics.len(),
        config.mongodb.uri,
        config.http.bind,
        config.http.port,
    );

    let registry = Registry::new();
    let exporter_metrics = ExporterMetrics::new(&registry)?;
    let shutdown = CancellationToken::new();
    let connector = Arc::new(MongoConnector::new(config.mongodb.uri.clone()));
    let manager = ConnectionManager::new(
        config.metrics.clone(),
        connector,
        registry.clone(),
        exporter_metrics,
        shutdown.clone(),
    );

    let state = AppState {
        collectors: manager.collectors(),
        registry,
        connection: manager.connection_slot(),
    };
    let manager_handle = tokio::spawn(manager.run());

    let app = create_router(state, &config.http);
    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        "Serving metrics on http://{}{}",
        addr,
        config.http.prometheus
    );
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The signal handler already cancelled the token; make sure the manager
    // drains even if the server exited on its own.
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager_handle)
        .await
        .is_err()
    {
        tracing::warn!("Connection manager did not stop within the shutdown deadline");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then cancel the shared token.
async fn shutdown_signal(shutdown: CancellationToken) {
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

    shutdown.cancel();
}
