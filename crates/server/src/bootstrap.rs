use aide_core::config::{AppConfig, ConfigError, LoadOptions};
use aide_db::{connect_with_config, migrations, DbPool};
use aide_providers::{AssemblyError, Services};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("service wiring failed: {0}")]
    Assembly(#[from] AssemblyError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let services = Services::assemble(&config, db_pool.clone())?;
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        llm_model = %config.llm.model,
        mailbox_enabled = config.mailbox.enabled,
        crm_enabled = config.crm.enabled,
        "agent services assembled"
    );

    Ok(Application { config, db_pool, services })
}
