//! Lifecycle server binary.
//!
//! Serves the lifecycle trigger, add-on and health endpoints. With the
//! `background-jobs` feature and `jobs.enabled`, also runs the daily
//! lifecycle in-process.

use std::net::SocketAddr;

use lifecycle::config::get_config;
use lifecycle::jobs::LifecycleContext;
use lifecycle::server::{build_router, AppState, AuthState, Database};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config()?;
    init_tracing(&config.logging.level, config.logging.json);

    info!("Starting entitlement lifecycle server");

    let db = Database::new().await?;
    info!("Connected to {} database", db.db_type());

    let ctx = LifecycleContext::from_config(config, db)?;
    let auth = AuthState::from_config(&config.auth)?;
    if !auth.cron_secret_required() {
        tracing::warn!("No cron secret configured; lifecycle trigger endpoints are open");
    }

    #[cfg(feature = "background-jobs")]
    let mut scheduler = if config.jobs.enabled {
        use lifecycle::jobs::{JobConfig, JobScheduler};
        let scheduler = JobScheduler::new(ctx.clone(), JobConfig::from(&config.jobs)).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    let app = build_router(AppState { ctx, auth });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    #[cfg(feature = "background-jobs")]
    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }

    Ok(())
}
