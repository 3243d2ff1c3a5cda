//! lvs-fusion - live verification streaming service
//!
//! Accepts video frames over WebSocket, fuses liveness, deepfake and
//! face-match evidence per session and persists one verdict per
//! (meeting, subject).

use anyhow::{Context, Result};
use clap::Parser;
use lvs_common::config::{resolve_config_path, TomlConfig};
use lvs_common::db::init_database;
use lvs_fusion::geo::GeoLocator;
use lvs_fusion::models::RemoteModels;
use lvs_fusion::{build_router, AppState, FusionEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Upper bound on waiting for open sessions to finalize at shutdown
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "lvs-fusion")]
#[command(about = "Live verification streaming fusion engine")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LVS_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "LVS_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "LVS_BIND_ADDR")]
    bind_addr: Option<String>,

    /// SQLite database file
    #[arg(long, env = "LVS_DATABASE")]
    database: Option<PathBuf>,

    /// Folder holding uploaded identity documents
    #[arg(long, env = "LVS_UPLOADS_DIR")]
    uploads_dir: Option<PathBuf>,

    /// Inference sidecar base URL
    #[arg(long, env = "LVS_INFERENCE_ENDPOINT")]
    inference_endpoint: Option<String>,
}

impl Args {
    /// Flags and environment override the file
    fn apply(self, config: &mut TomlConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(database) = self.database {
            config.database_path = database;
        }
        if let Some(uploads_dir) = self.uploads_dir {
            config.uploads_dir = uploads_dir;
        }
        if let Some(endpoint) = self.inference_endpoint {
            config.inference.endpoint = Some(endpoint);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting lvs-fusion v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }

    args.apply(&mut config);
    config
        .tunables
        .validate()
        .context("Invalid tunables")?;

    info!("Database: {}", config.database_path.display());
    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let models = RemoteModels::connect(&config.inference).await;
    let geo = GeoLocator::new(&config.geolocation);
    if geo.is_enabled() {
        info!("Client geolocation via {}", config.geolocation.endpoint);
    }

    let engine = Arc::new(FusionEngine::new(
        &models,
        config.tunables.clone(),
        pool,
        geo,
        config.uploads_dir.clone(),
    ));
    let availability = engine.availability();
    if !(availability.liveness && availability.deepfake && availability.face_match) {
        warn!("Running with degraded evaluators: {:?}", availability);
    }

    let app = build_router(AppState::new(engine.clone()));

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_addr, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("lvs-fusion listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // Upgraded sockets outlive serve; finalize them before the runtime goes
    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, engine.shutdown())
        .await
        .is_err()
    {
        warn!(
            "{} sessions still open after {:?}",
            engine.sessions.len(),
            SESSION_DRAIN_TIMEOUT
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
