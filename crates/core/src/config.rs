use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub crm: CrmConfig,
    pub mailbox: MailboxConfig,
    pub ingestion: IngestionConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub dimensions: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_similarity: f32,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MailboxConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IngestionConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lookback_secs: u64,
    pub max_events: u32,
    pub auto_create_contacts: bool,
}

/// Periodic CRM import and embedding backfill.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub embed_batch: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub crm_enabled: Option<bool>,
    pub ingestion_enabled: Option<bool>,
    pub ingestion_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://aide.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                temperature: 0.7,
            },
            embedding: EmbeddingConfig {
                api_key: None,
                base_url: "http://localhost:11434/v1".to_string(),
                model: "nomic-embed-text".to_string(),
                dimensions: 768,
                timeout_secs: 30,
            },
            retrieval: RetrievalConfig { top_k: 5, min_similarity: 0.3, history_limit: 20 },
            crm: CrmConfig {
                enabled: false,
                base_url: "https://api.hubapi.com".to_string(),
                timeout_secs: 30,
            },
            mailbox: MailboxConfig {
                enabled: false,
                base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
                timeout_secs: 30,
            },
            ingestion: IngestionConfig {
                enabled: true,
                interval_secs: 600,
                lookback_secs: 3600,
                max_events: 50,
                auto_create_contacts: true,
            },
            sync: SyncConfig { enabled: true, interval_secs: 900, embed_batch: 100 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// Resolved OpenAI-compatible endpoint root.
    pub fn endpoint(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com/v1".to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("aide.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(embedding) = patch.embedding {
            if let Some(api_key) = embedding.api_key {
                self.embedding.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = embedding.base_url {
                self.embedding.base_url = base_url;
            }
            if let Some(model) = embedding.model {
                self.embedding.model = model;
            }
            if let Some(dimensions) = embedding.dimensions {
                self.embedding.dimensions = dimensions;
            }
            if let Some(timeout_secs) = embedding.timeout_secs {
                self.embedding.timeout_secs = timeout_secs;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(min_similarity) = retrieval.min_similarity {
                self.retrieval.min_similarity = min_similarity;
            }
            if let Some(history_limit) = retrieval.history_limit {
                self.retrieval.history_limit = history_limit;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
        }

        if let Some(mailbox) = patch.mailbox {
            if let Some(enabled) = mailbox.enabled {
                self.mailbox.enabled = enabled;
            }
            if let Some(base_url) = mailbox.base_url {
                self.mailbox.base_url = base_url;
            }
            if let Some(timeout_secs) = mailbox.timeout_secs {
                self.mailbox.timeout_secs = timeout_secs;
            }
        }

        if let Some(ingestion) = patch.ingestion {
            if let Some(enabled) = ingestion.enabled {
                self.ingestion.enabled = enabled;
            }
            if let Some(interval_secs) = ingestion.interval_secs {
                self.ingestion.interval_secs = interval_secs;
            }
            if let Some(lookback_secs) = ingestion.lookback_secs {
                self.ingestion.lookback_secs = lookback_secs;
            }
            if let Some(max_events) = ingestion.max_events {
                self.ingestion.max_events = max_events;
            }
            if let Some(auto_create_contacts) = ingestion.auto_create_contacts {
                self.ingestion.auto_create_contacts = auto_create_contacts;
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(enabled) = sync.enabled {
                self.sync.enabled = enabled;
            }
            if let Some(interval_secs) = sync.interval_secs {
                self.sync.interval_secs = interval_secs;
            }
            if let Some(embed_batch) = sync.embed_batch {
                self.sync.embed_batch = embed_batch;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AIDE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AIDE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("AIDE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AIDE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("AIDE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AIDE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("AIDE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AIDE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("AIDE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AIDE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("AIDE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AIDE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("AIDE_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("AIDE_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AIDE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = value;
        }
        if let Some(value) = read_env("AIDE_EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = read_env("AIDE_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = parse_u32("AIDE_EMBEDDING_DIMENSIONS", &value)?;
        }

        if let Some(value) = read_env("AIDE_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("AIDE_RETRIEVAL_TOP_K", &value)?;
        }
        if let Some(value) = read_env("AIDE_RETRIEVAL_MIN_SIMILARITY") {
            self.retrieval.min_similarity = parse_f32("AIDE_RETRIEVAL_MIN_SIMILARITY", &value)?;
        }

        if let Some(value) = read_env("AIDE_CRM_ENABLED") {
            self.crm.enabled = parse_bool("AIDE_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("AIDE_CRM_BASE_URL") {
            self.crm.base_url = value;
        }

        if let Some(value) = read_env("AIDE_MAILBOX_ENABLED") {
            self.mailbox.enabled = parse_bool("AIDE_MAILBOX_ENABLED", &value)?;
        }
        if let Some(value) = read_env("AIDE_MAILBOX_BASE_URL") {
            self.mailbox.base_url = value;
        }

        if let Some(value) = read_env("AIDE_INGESTION_ENABLED") {
            self.ingestion.enabled = parse_bool("AIDE_INGESTION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("AIDE_INGESTION_INTERVAL_SECS") {
            self.ingestion.interval_secs = parse_u64("AIDE_INGESTION_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("AIDE_INGESTION_LOOKBACK_SECS") {
            self.ingestion.lookback_secs = parse_u64("AIDE_INGESTION_LOOKBACK_SECS", &value)?;
        }
        if let Some(value) = read_env("AIDE_INGESTION_AUTO_CREATE_CONTACTS") {
            self.ingestion.auto_create_contacts =
                parse_bool("AIDE_INGESTION_AUTO_CREATE_CONTACTS", &value)?;
        }

        if let Some(value) = read_env("AIDE_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("AIDE_SYNC_ENABLED", &value)?;
        }
        if let Some(value) = read_env("AIDE_SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = parse_u64("AIDE_SYNC_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("AIDE_SYNC_EMBED_BATCH") {
            self.sync.embed_batch = parse_usize("AIDE_SYNC_EMBED_BATCH", &value)?;
        }

        if let Some(value) = read_env("AIDE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AIDE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("AIDE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("AIDE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("AIDE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("AIDE_LOGGING_LEVEL").or_else(|| read_env("AIDE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("AIDE_LOGGING_FORMAT").or_else(|| read_env("AIDE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(embedding_model) = overrides.embedding_model {
            self.embedding.model = embedding_model;
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(enabled) = overrides.ingestion_enabled {
            self.ingestion.enabled = enabled;
        }
        if let Some(interval_secs) = overrides.ingestion_interval_secs {
            self.ingestion.interval_secs = interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_embedding(&self.embedding)?;
        validate_retrieval(&self.retrieval)?;
        validate_crm(&self.crm)?;
        validate_mailbox(&self.mailbox)?;
        validate_ingestion(&self.ingestion)?;
        validate_sync(&self.sync)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("aide.toml"), PathBuf::from("config/aide.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider. Set AIDE_LLM_API_KEY or [llm].api_key"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if let Some(base_url) = &llm.base_url {
        validate_http_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<(), ConfigError> {
    validate_http_url("embedding.base_url", &embedding.base_url)?;

    if embedding.model.trim().is_empty() {
        return Err(ConfigError::Validation("embedding.model must not be empty".to_string()));
    }

    if embedding.dimensions == 0 {
        return Err(ConfigError::Validation(
            "embedding.dimensions must be greater than zero".to_string(),
        ));
    }

    if embedding.timeout_secs == 0 || embedding.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "embedding.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.top_k == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }

    if !(-1.0..=1.0).contains(&retrieval.min_similarity) {
        return Err(ConfigError::Validation(
            "retrieval.min_similarity must be in range -1.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_mailbox(mailbox: &MailboxConfig) -> Result<(), ConfigError> {
    if mailbox.enabled {
        validate_http_url("mailbox.base_url", &mailbox.base_url)?;
    }

    if mailbox.timeout_secs == 0 || mailbox.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mailbox.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        validate_http_url("crm.base_url", &crm.base_url)?;
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "crm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_ingestion(ingestion: &IngestionConfig) -> Result<(), ConfigError> {
    if ingestion.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "ingestion.interval_secs must be greater than zero".to_string(),
        ));
    }

    if ingestion.max_events == 0 || ingestion.max_events > 500 {
        return Err(ConfigError::Validation(
            "ingestion.max_events must be in range 1..=500".to_string(),
        ));
    }

    Ok(())
}

fn validate_sync(sync: &SyncConfig) -> Result<(), ConfigError> {
    if sync.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sync.interval_secs must be greater than zero".to_string(),
        ));
    }

    if sync.embed_batch == 0 || sync.embed_batch > 1000 {
        return Err(ConfigError::Validation("sync.embed_batch must be in range 1..=1000".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    parse_env(key, value)
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    parse_env(key, value)
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    parse_env(key, value)
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    parse_env(key, value)
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    parse_env(key, value)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_env(key, value)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    embedding: Option<EmbeddingPatch>,
    retrieval: Option<RetrievalPatch>,
    crm: Option<CrmPatch>,
    mailbox: Option<MailboxPatch>,
    ingestion: Option<IngestionPatch>,
    sync: Option<SyncPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    dimensions: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    top_k: Option<usize>,
    min_similarity: Option<f32>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MailboxPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestionPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    lookback_secs: Option<u64>,
    max_events: Option<u32>,
    auto_create_contacts: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    embed_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
