use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use visitdesk::auth::{AccountManager, SessionManager};
use visitdesk::backup::{BackupEngine, ObjectStore, S3ObjectStore};
use visitdesk::config::Config;
use visitdesk::security::{EventType, SecurityMonitor};
use visitdesk::store::RecordStore;
use visitdesk::AppState;

#[derive(Parser, Debug)]
#[command(name = "visitdesk")]
#[command(author, version, about = "A lightweight visit scheduling and tracking server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "visitdesk.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Visitdesk v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("Failed to create {}", config.server.data_dir.display()))?;

    // Open the record store
    let store = Arc::new(RecordStore::open(&config.server.data_dir)?);

    // Ensure default admin account exists
    let accounts = Arc::new(AccountManager::new(store.clone())?);
    let admin_password = config
        .auth
        .admin_password
        .clone()
        .unwrap_or_else(|| format!("Vd-{}", uuid::Uuid::new_v4()));
    if accounts
        .ensure_admin(&config.auth.admin_email, &admin_password)
        .await?
    {
        tracing::info!(email = %config.auth.admin_email, "Created default admin account");
        if config.auth.admin_password.is_none() {
            // Shown once; a password change is forced on first login.
            tracing::info!("Generated admin password: {}", admin_password);
        }
    }

    // Sessions with sliding expiry and a periodic sweep
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        config.auth.session_timeout_minutes,
    ));
    visitdesk::auth::sessions::spawn_sweep_task(sessions.clone());

    // Security event monitor
    let monitor = Arc::new(SecurityMonitor::new(
        config.audit_log_path(),
        config.security.failed_login_threshold,
    ));

    // Backup engine with optional S3 mirror
    let backups = if config.backup.enabled {
        let remote: Option<Arc<dyn ObjectStore>> = match &config.backup.s3 {
            Some(s3) => {
                let store = S3ObjectStore::connect(
                    &s3.bucket,
                    s3.region.clone(),
                    s3.endpoint.clone(),
                    &s3.prefix,
                )
                .await?;
                store.ensure_bucket().await?;
                Some(Arc::new(store))
            }
            None => None,
        };
        let engine = Arc::new(BackupEngine::new(store.clone(), config.backup_dir(), remote)?);

        let nightly = cron::Schedule::from_str(&config.backup.nightly_schedule)
            .with_context(|| "Invalid nightly backup schedule")?;
        let prune = cron::Schedule::from_str(&config.backup.prune_schedule)
            .with_context(|| "Invalid prune schedule")?;
        visitdesk::backup::spawn_backup_jobs(
            engine.clone(),
            nightly,
            prune,
            config.backup_timezone()?,
            config.backup.retention_days,
        );
        Some(engine)
    } else {
        tracing::warn!("Backups are disabled");
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        accounts,
        sessions,
        monitor.clone(),
        backups,
    ));

    let app = visitdesk::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    monitor
        .record(
            EventType::ServerStarted,
            serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        )
        .await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.record(EventType::ServerStopped, serde_json::json!({})).await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
