use aide_core::config::{AppConfig, LlmProvider, LoadOptions};
use aide_db::connect_with_settings;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ),
            check_llm(&config),
            check_integrations(&config),
            check_database_connectivity(&config),
        ],
        Err(error) => {
            let skipped = "skipped because configuration did not load";
            vec![
                DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()),
                DoctorCheck::new("llm_endpoint", CheckStatus::Skipped, skipped),
                DoctorCheck::new("integrations", CheckStatus::Skipped, skipped),
                DoctorCheck::new("database_connectivity", CheckStatus::Skipped, skipped),
            ]
        }
    };

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

// Endpoint reachability is not checked; the first turn surfaces that.
fn check_llm(config: &AppConfig) -> DoctorCheck {
    let credential = match (config.llm.provider, config.llm.api_key.is_some()) {
        (LlmProvider::OpenAi, _) => "api key present",
        (LlmProvider::Ollama, true) => "api key present",
        (LlmProvider::Ollama, false) => "no api key (local server)",
    };
    DoctorCheck::new(
        "llm_endpoint",
        CheckStatus::Pass,
        format!("{} at {} ({credential})", config.llm.model, config.llm.endpoint()),
    )
}

fn check_integrations(config: &AppConfig) -> DoctorCheck {
    let state = |enabled: bool| if enabled { "enabled" } else { "disabled" };
    let status = if config.mailbox.enabled || config.crm.enabled {
        CheckStatus::Pass
    } else {
        CheckStatus::Skipped
    };
    DoctorCheck::new(
        "integrations",
        status,
        format!(
            "mailbox {}, crm {}, ingestion {}",
            state(config.mailbox.enabled),
            state(config.crm.enabled),
            state(config.ingestion.enabled && config.mailbox.enabled)
        ),
    )
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
