//! retail_ledger - Retail Banking Ledger Backend
//!
//! Moves money between accounts, settles bills and drives loans through
//! their lifecycle while keeping balances consistent under concurrency.

use std::net::SocketAddr;
use std::sync::Arc;

use retail_ledger::config::{LogFormat, StorageBackend};
use retail_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use retail_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use retail_ledger::{build_router, db, AppState, Config};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "retail_ledger=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting retail_ledger server");
    if config.otp_expose_code {
        tracing::warn!("OTP_EXPOSE_CODE is enabled: challenge codes are returned in responses");
    }

    let (store, pool): (Arc<dyn LedgerStore>, Option<PgPool>) = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(url, config.database_max_connections).await?;
            db::verify_connection(&pool).await?;

            // Verify database schema
            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            (Arc::new(PgLedgerStore::new(pool.clone())), Some(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on shutdown");
            (Arc::new(InMemoryLedgerStore::new()), None)
        }
    };

    // Background maintenance
    let jobs = JobScheduler::with_config(
        store.clone(),
        JobSchedulerConfig {
            retention: chrono::Duration::hours(config.authorization_retention_hours),
            ..JobSchedulerConfig::default()
        },
    )
    .start();

    let app = build_router(AppState::new(store, config));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    jobs.abort();
    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed. Goodbye!");
    }

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
