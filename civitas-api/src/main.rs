//! civitas-api - Main entry point
//!
//! Loads configuration, opens (and migrates) the database under the root
//! folder, bootstraps the administrator, and serves the HTTP API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter};

use civitas_api::auth::bootstrap_admin;
use civitas_api::db::sessions::purge_expired_sessions;
use civitas_api::services::gateway_from_config;
use civitas_api::{build_router, AppState};
use civitas_common::config::{load_toml_config, resolve_root_folder, RootFolder};
use civitas_common::db::init_database;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line arguments for civitas-api
#[derive(Parser, Debug)]
#[command(name = "civitas-api")]
#[command(about = "Municipal incident reporting service")]
#[command(version)]
struct Args {
    /// Root folder holding the database and uploaded photos
    #[arg(short, long, env = "CIVITAS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "CIVITAS_CONFIG")]
    config: Option<PathBuf>,

    /// Socket address to listen on (overrides server.bind)
    #[arg(short, long)]
    bind: Option<String>,

    /// Default log directive when RUST_LOG is unset (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Subscriber goes in before config loading so its messages are kept;
    // the filter is swapped for the configured level afterwards.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let initial = env_filter.unwrap_or_else(|| {
        log_filter(args.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))
    });
    let (filter, reload_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_env_overrides();
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if !from_env {
        if let Err(e) = reload_handle.reload(log_filter(&config.logging.level)) {
            warn!("Failed to apply logging.level {}: {}", config.logging.level, e);
        }
    }

    // Build identification first, before any database work
    info!(
        "Starting Civitas API (civitas-api) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    config.validate().context("Invalid configuration")?;

    let root = RootFolder::new(resolve_root_folder(args.root_folder.as_deref(), &config));
    root.ensure_directories()
        .with_context(|| format!("Failed to create root folder {}", root.path().display()))?;
    info!("Root folder: {}", root.path().display());

    let db_path = root.database_path();
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("✓ Database ready: {}", db_path.display());

    match bootstrap_admin(&pool, &config.auth).await? {
        Some(id) => info!("Administrator account: {}", id),
        None => warn!("No bootstrap administrator configured (auth.admin_email)"),
    }

    let gateway = gateway_from_config(&config.whatsapp, config.storage.max_image_bytes)?;
    if config.whatsapp.webhook_secret.is_none() {
        warn!("whatsapp.webhook_secret unset; webhook signatures are not verified");
    }

    let bind = config.server.bind.clone();
    let state = AppState::new(pool.clone(), config, root.uploads_path()).with_gateway(gateway);
    let app = build_router(state);

    tokio::spawn(purge_sessions_periodically(pool));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("civitas-api listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Filter for `level`, keeping request traces visible
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("{},tower_http=info", level))
}

/// Drop expired sessions once an hour
async fn purge_sessions_periodically(pool: sqlx::SqlitePool) {
    let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        match purge_expired_sessions(&pool).await {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired session(s)", n),
            Err(e) => warn!("Session purge failed: {}", e),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
