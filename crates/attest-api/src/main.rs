//! # attest-api: Binary Entry Point
//!
//! Loads [`AppConfig`] from the environment, wires the services, starts the
//! background scheduler (queue drain, expiry sweep, webhook delivery), and
//! serves until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use attest_api::bootstrap;
use attest_api::config::AppConfig;
use attest_core::{Clock, RandomIds, SystemClock};
use attest_sync::Scheduler;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let pool = bootstrap::connect(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let services = bootstrap::build(&config, pool.clone(), clock.clone(), Arc::new(RandomIds))
        .await
        .context("wiring services")?;

    let scheduler = Scheduler::spawn(
        services.state.reconciler.clone(),
        services.state.engine.clone(),
        services.webhooks.clone(),
        clock,
        config.scheduler,
    );

    let app = attest_api::app(services.state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "attest API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    scheduler.shutdown().await;
    pool.close().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
