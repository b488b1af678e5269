pub mod chat;
pub mod config;
pub mod doctor;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod owner;
pub mod sync;

use aide_core::config::{AppConfig, LoadOptions};
use aide_core::errors::{ApplicationError, InterfaceError};
use aide_db::{connect_with_config, migrations, DbPool};
use aide_providers::Services;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_details(command, message, None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Failure triple carried out of `block_on`: error class, message, exit code.
pub(crate) type StepFailure = (&'static str, String, u8);

/// Loads config and builds the single-threaded runtime every command uses.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        },
    )?;

    Ok((config, runtime))
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, StepFailure> {
    let pool = connect_with_config(&config.database)
        .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) async fn open_services(config: &AppConfig) -> Result<(DbPool, Services), StepFailure> {
    let pool = open_pool(config).await?;
    let services = Services::assemble(config, pool.clone())
        .map_err(|error| ("service_wiring", error.to_string(), 6u8))?;
    Ok((pool, services))
}

/// Maps a service failure onto the operator-facing error classes.
pub(crate) fn interface_failure(error: ApplicationError, correlation_id: &str) -> StepFailure {
    let detail = error.to_string();
    let interface = error.into_interface(correlation_id);
    let (error_class, exit_code) = match &interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 2),
        InterfaceError::NotFound { .. } => ("not_found", 7),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 8),
        InterfaceError::Internal { .. } => ("internal", 9),
    };
    let message = format!(
        "{} [{}] ({detail})",
        interface.user_message(),
        interface.correlation_id()
    );
    (error_class, message, exit_code)
}

pub(crate) fn finish(command: &str, result: Result<(String, Value), StepFailure>) -> CommandResult {
    match result {
        Ok((message, details)) => CommandResult::success_with_details(command, message, Some(details)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
