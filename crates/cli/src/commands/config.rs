use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use aide_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// Effective value of one setting and the env var that can override it.
struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

fn entry(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Entry {
    Entry { key, value: value.to_string(), env_key }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for item in entries(&config) {
        let source =
            field_source(item.key, item.env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(item.key, &item.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    vec![
        entry("database.url", &config.database.url, Some("AIDE_DATABASE_URL")),
        entry(
            "database.max_connections",
            config.database.max_connections,
            Some("AIDE_DATABASE_MAX_CONNECTIONS"),
        ),
        entry("database.timeout_secs", config.database.timeout_secs, Some("AIDE_DATABASE_TIMEOUT_SECS")),
        entry("llm.provider", format!("{:?}", config.llm.provider), Some("AIDE_LLM_PROVIDER")),
        entry("llm.model", &config.llm.model, Some("AIDE_LLM_MODEL")),
        entry("llm.base_url", config.llm.endpoint(), Some("AIDE_LLM_BASE_URL")),
        entry("llm.api_key", redact_secret(config.llm.api_key.as_ref()), Some("AIDE_LLM_API_KEY")),
        entry("llm.temperature", config.llm.temperature, Some("AIDE_LLM_TEMPERATURE")),
        entry("embedding.model", &config.embedding.model, Some("AIDE_EMBEDDING_MODEL")),
        entry("embedding.base_url", &config.embedding.base_url, Some("AIDE_EMBEDDING_BASE_URL")),
        entry("embedding.dimensions", config.embedding.dimensions, Some("AIDE_EMBEDDING_DIMENSIONS")),
        entry(
            "embedding.api_key",
            redact_secret(config.embedding.api_key.as_ref()),
            Some("AIDE_EMBEDDING_API_KEY"),
        ),
        entry("retrieval.top_k", config.retrieval.top_k, Some("AIDE_RETRIEVAL_TOP_K")),
        entry(
            "retrieval.min_similarity",
            config.retrieval.min_similarity,
            Some("AIDE_RETRIEVAL_MIN_SIMILARITY"),
        ),
        entry("retrieval.history_limit", config.retrieval.history_limit, None),
        entry("mailbox.enabled", config.mailbox.enabled, Some("AIDE_MAILBOX_ENABLED")),
        entry("mailbox.base_url", &config.mailbox.base_url, Some("AIDE_MAILBOX_BASE_URL")),
        entry("crm.enabled", config.crm.enabled, Some("AIDE_CRM_ENABLED")),
        entry("crm.base_url", &config.crm.base_url, Some("AIDE_CRM_BASE_URL")),
        entry("ingestion.enabled", config.ingestion.enabled, Some("AIDE_INGESTION_ENABLED")),
        entry(
            "ingestion.interval_secs",
            config.ingestion.interval_secs,
            Some("AIDE_INGESTION_INTERVAL_SECS"),
        ),
        entry(
            "ingestion.lookback_secs",
            config.ingestion.lookback_secs,
            Some("AIDE_INGESTION_LOOKBACK_SECS"),
        ),
        entry("ingestion.max_events", config.ingestion.max_events, None),
        entry(
            "ingestion.auto_create_contacts",
            config.ingestion.auto_create_contacts,
            Some("AIDE_INGESTION_AUTO_CREATE_CONTACTS"),
        ),
        entry("sync.enabled", config.sync.enabled, Some("AIDE_SYNC_ENABLED")),
        entry("sync.interval_secs", config.sync.interval_secs, Some("AIDE_SYNC_INTERVAL_SECS")),
        entry("sync.embed_batch", config.sync.embed_batch, Some("AIDE_SYNC_EMBED_BATCH")),
        entry("server.bind_address", &config.server.bind_address, Some("AIDE_SERVER_BIND_ADDRESS")),
        entry(
            "server.health_check_port",
            config.server.health_check_port,
            Some("AIDE_SERVER_HEALTH_CHECK_PORT"),
        ),
        entry("logging.level", &config.logging.level, Some("AIDE_LOGGING_LEVEL")),
        entry("logging.format", format!("{:?}", config.logging.format), Some("AIDE_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("aide.toml"), PathBuf::from("config/aide.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows at most the key's prefix, e.g. `sk-***`.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from("sk-abc123".to_string()))), "sk-***");
        assert_eq!(redact_secret(Some(&SecretString::from("plaintoken".to_string()))), "<redacted>");
        assert_eq!(
            redact_secret(Some(&SecretString::from("longprefix-abc".to_string()))),
            "<redacted>"
        );
    }

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: Value = "[ingestion]\ninterval_secs = 60\n".parse().expect("toml");
        assert!(contains_path(&doc, "ingestion.interval_secs"));
        assert!(!contains_path(&doc, "ingestion.lookback_secs"));
        assert!(!contains_path(&doc, "crm.enabled"));
    }
}
