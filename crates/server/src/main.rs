mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use trustline_agent::SupportRuntime;
use trustline_core::config::{AppConfig, LoadOptions};

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use trustline_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let routes = api::router(api::ApiState::new(Arc::clone(&app.runtime), app.complaints.clone()))
        .merge(health::router(health::HealthState::new(
            app.db_pool.clone(),
            Arc::clone(&app.runtime),
        )));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let evictor = tokio::spawn(evict_sessions(Arc::clone(&app.runtime), shutdown_rx.clone()));

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "trustline-server listening"
    );

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "trustline-server stopping"
    );
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => return Err(error).context("http server failed"),
        Ok(Err(join_error)) => return Err(join_error).context("http server task panicked"),
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish within the grace period"
            );
        }
    }
    evictor.abort();
    app.db_pool.close().await;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "trustline-server stopped"
    );
    Ok(())
}

async fn evict_sessions(runtime: Arc<SupportRuntime>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                runtime.evict_expired(Utc::now()).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
