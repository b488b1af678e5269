mod bootstrap;
mod health;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use aide_core::config::{AppConfig, LoadOptions};
use anyhow::Result;
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use aide_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
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
    let ingestion = app.config.ingestion.enabled.then(|| Arc::clone(&app.services.ingestion));

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        ingestion.clone(),
    )
    .await?;

    let (stop, shutdown) = watch::channel(false);
    let mut schedulers = Vec::new();
    if let Some(ingestion) = &ingestion {
        let ingestion = Arc::clone(ingestion);
        schedulers.push(scheduler::spawn(
            "ingestion",
            Duration::from_secs(app.config.ingestion.interval_secs),
            shutdown.clone(),
            move || {
                let ingestion = Arc::clone(&ingestion);
                async move {
                    let report = ingestion.run_cycle().await;
                    if report.failures > 0 {
                        tracing::warn!(
                            event_name = "system.scheduler.cycle_failures",
                            failures = report.failures,
                            "ingestion cycle finished with failures"
                        );
                    }
                }
            },
        ));
    }
    if app.config.sync.enabled {
        let sync = Arc::clone(&app.services.sync);
        schedulers.push(scheduler::spawn(
            "sync",
            Duration::from_secs(app.config.sync.interval_secs),
            shutdown,
            move || {
                let sync = Arc::clone(&sync);
                async move {
                    let report = sync.run().await;
                    if report.failures > 0 {
                        tracing::warn!(
                            event_name = "system.scheduler.sync_failures",
                            failures = report.failures,
                            "sync finished with failures"
                        );
                    }
                }
            },
        ));
    }

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        ingestion_enabled = ingestion.is_some(),
        ingestion_interval_secs = app.config.ingestion.interval_secs,
        sync_enabled = app.config.sync.enabled,
        sync_interval_secs = app.config.sync.interval_secs,
        "aide-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "aide-server stopping"
    );

    let _ = stop.send(true);
    for handle in schedulers {
        let _ = handle.await;
    }
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let services = &app.services;
    if !scheduler::drain(|| services.ingestion.is_running() || services.sync.is_running(), grace)
        .await
    {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "background job still running at shutdown"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
