//! Tool catalog offered to the model and the executor that runs it.
//!
//! The catalog is closed: every tool is a [`ToolKind`] variant. The executor
//! never fails; unknown tools, malformed or missing arguments and upstream
//! errors all come back as `{"success": false, "error": ...}` payloads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use aide_core::domain::conversation::{ConversationId, ToolUsage};
use aide_core::domain::owner::Owner;
use aide_core::retrieval::{RetrievalEngine, RetrievalError};
use aide_db::repositories::{RecordRepository, RepositoryError};

use crate::capabilities::{CapabilityError, Crm, Mailbox};
use crate::correlation::{CorrelationError, TaskCorrelationEngine};
use crate::llm::ToolSchema;

mod counterparty;
mod messaging;
mod records;
mod tasks;

pub use counterparty::{CreateCounterpartyTool, SearchCounterpartyTool};
pub use messaging::SendMessageTool;
pub use records::{ReadRecordTool, SearchRecordsTool};
pub use tasks::{CancelTaskTool, ListTasksTool, RegisterTaskTool, SemanticSearchTool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SearchRecords,
    ReadRecord,
    SendMessage,
    SearchCounterparty,
    CreateCounterparty,
    SemanticSearch,
    RegisterTask,
    ListTasks,
    CancelTask,
}

impl ToolKind {
    pub const ALL: [ToolKind; 9] = [
        Self::SearchRecords,
        Self::ReadRecord,
        Self::SendMessage,
        Self::SearchCounterparty,
        Self::CreateCounterparty,
        Self::SemanticSearch,
        Self::RegisterTask,
        Self::ListTasks,
        Self::CancelTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchRecords => "search_records",
            Self::ReadRecord => "read_record",
            Self::SendMessage => "send_message",
            Self::SearchCounterparty => "search_counterparty",
            Self::CreateCounterparty => "create_counterparty",
            Self::SemanticSearch => "semantic_search",
            Self::RegisterTask => "register_task",
            Self::ListTasks => "list_tasks",
            Self::CancelTask => "cancel_task",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Who is calling and from which conversation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub owner: Owner,
    pub conversation_id: Option<ConversationId>,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Precondition(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object; `required` is enforced before
    /// `execute` runs.
    fn parameters(&self) -> Value;
    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.kind().name(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// Outcome of one executed tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
    pub success: bool,
}

impl ToolInvocation {
    pub fn usage(&self) -> ToolUsage {
        ToolUsage { tool: self.tool.clone(), success: self.success }
    }
}

/// Everything the built-in catalog needs.
#[derive(Clone)]
pub struct ToolDependencies {
    pub records: Arc<dyn RecordRepository>,
    pub retrieval: RetrievalEngine,
    pub mailbox: Arc<dyn Mailbox>,
    pub crm: Arc<dyn Crm>,
    pub tasks: Arc<TaskCorrelationEngine>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    /// Registry holding the whole catalog.
    pub fn with_catalog(dependencies: ToolDependencies) -> Self {
        let mut registry = Self::default();
        registry.register(SearchRecordsTool::new(dependencies.records.clone()));
        registry.register(ReadRecordTool::new(dependencies.records.clone()));
        registry.register(SendMessageTool::new(dependencies.mailbox));
        registry.register(SearchCounterpartyTool::new(dependencies.crm.clone()));
        registry.register(CreateCounterpartyTool::new(dependencies.crm, dependencies.records));
        registry.register(SemanticSearchTool::new(dependencies.retrieval));
        registry.register(RegisterTaskTool::new(dependencies.tasks.clone()));
        registry.register(ListTasksTool::new(dependencies.tasks.clone()));
        registry.register(CancelTaskTool::new(dependencies.tasks));
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.kind().name();
        if self.tools.insert(name, Arc::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order.iter().filter_map(|name| self.tools.get(name)).map(|tool| tool.schema()).collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        raw_arguments: &str,
        context: &ToolContext,
    ) -> ToolInvocation {
        let parsed = parse_arguments(raw_arguments);
        let arguments_value = match &parsed {
            Ok(arguments) => Value::Object(arguments.clone()),
            Err(_) => Value::String(raw_arguments.to_string()),
        };

        let outcome = match (ToolKind::parse(name).and_then(|kind| self.tools.get(kind.name())), parsed) {
            (None, _) => Err(ToolError::InvalidArguments(format!("Unknown tool: {name}"))),
            (Some(_), Err(error)) => Err(error),
            (Some(tool), Ok(arguments)) => match validate_required(&tool.parameters(), &arguments) {
                Ok(()) => tool.execute(&arguments, context).await,
                Err(error) => Err(error),
            },
        };

        let (result, success) = match outcome {
            Ok(payload) => (success_payload(payload), true),
            Err(error) => {
                warn!(
                    event_name = "tool.execution.failed",
                    tool = name,
                    owner_id = %context.owner.id,
                    error = %error,
                    "tool call failed"
                );
                (json!({ "success": false, "error": error.to_string() }), false)
            }
        };

        info!(
            event_name = "tool.execution.finished",
            tool = name,
            owner_id = %context.owner.id,
            success,
            "tool call finished"
        );

        ToolInvocation { tool: name.to_string(), arguments: arguments_value, result, success }
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(_) => Err(ToolError::InvalidArguments("Tool arguments must be a JSON object".to_string())),
        Err(error) => Err(ToolError::InvalidArguments(format!("Malformed tool arguments: {error}"))),
    }
}

fn validate_required(schema: &Value, arguments: &Map<String, Value>) -> Result<(), ToolError> {
    let required = schema.get("required").and_then(Value::as_array).into_iter().flatten();
    let missing: Vec<&str> = required
        .filter_map(Value::as_str)
        .filter(|field| match arguments.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(value)) => value.trim().is_empty(),
            Some(_) => false,
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "Missing required argument(s): {}",
            missing.join(", ")
        )))
    }
}

fn success_payload(payload: Value) -> Value {
    match payload {
        Value::Object(mut object) => {
            object.insert("success".to_string(), Value::Bool(true));
            Value::Object(object)
        }
        other => json!({ "success": true, "result": other }),
    }
}

pub(crate) fn required_str<'a>(
    arguments: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, ToolError> {
    optional_str(arguments, key)
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` must be a non-empty string")))
}

pub(crate) fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

/// Positive integer argument, accepting numeric strings, capped at `max`.
pub(crate) fn optional_limit(
    arguments: &Map<String, Value>,
    key: &str,
    default: usize,
    max: usize,
) -> usize {
    let value = match arguments.get(key) {
        Some(Value::Number(number)) => number.as_u64().map(|value| value as usize),
        Some(Value::String(text)) => text.trim().parse::<usize>().ok(),
        _ => None,
    };
    value.filter(|value| *value > 0).unwrap_or(default).min(max)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use aide_core::domain::owner::Owner;

    use super::{optional_limit, Tool, ToolContext, ToolError, ToolKind, ToolRegistry};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> ToolKind {
            ToolKind::SearchRecords
        }

        fn description(&self) -> &'static str {
            "echo"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        async fn execute(
            &self,
            arguments: &Map<String, Value>,
            _context: &ToolContext,
        ) -> Result<Value, ToolError> {
            if arguments.get("query") == Some(&json!("boom")) {
                return Err(ToolError::Precondition("upstream exploded"));
            }
            Ok(json!({ "echo": arguments.get("query") }))
        }
    }

    fn context() -> ToolContext {
        ToolContext { owner: Owner::new("owner-1", "owner@corp.com"), conversation_id: None }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(EchoTool);
        registry
    }

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::parse("delete_everything"), None);
    }

    #[tokio::test]
    async fn every_outcome_carries_success_flag() {
        let registry = registry();
        let cases = [
            ("search_records", r#"{"query":"hello"}"#, true),
            ("search_records", r#"{"query":"boom"}"#, false),
            ("search_records", r#"{"query":"#, false),
            ("search_records", r#"["query"]"#, false),
            ("search_records", r#"{"limit":3}"#, false),
            ("search_records", r#"{"query":"   "}"#, false),
            ("unknown_tool", r#"{}"#, false),
            ("read_record", r#"{"id":"x"}"#, false),
        ];

        for (name, raw, expected) in cases {
            let invocation = registry.execute(name, raw, &context()).await;
            assert_eq!(invocation.success, expected, "{name} {raw}");
            assert_eq!(invocation.result.get("success"), Some(&Value::Bool(expected)), "{name} {raw}");
            if !expected {
                assert!(invocation.result.get("error").and_then(Value::as_str).is_some());
            }
        }
    }

    #[tokio::test]
    async fn missing_required_argument_is_named_in_error() {
        let invocation = registry().execute("search_records", "{}", &context()).await;
        assert_eq!(
            invocation.result,
            json!({ "success": false, "error": "Missing required argument(s): query" })
        );
    }

    #[test]
    fn limit_parsing_defaults_and_caps() {
        let mut arguments = Map::new();
        assert_eq!(optional_limit(&arguments, "limit", 5, 20), 5);
        arguments.insert("limit".to_string(), json!(50));
        assert_eq!(optional_limit(&arguments, "limit", 5, 20), 20);
        arguments.insert("limit".to_string(), json!("3"));
        assert_eq!(optional_limit(&arguments, "limit", 5, 20), 3);
        arguments.insert("limit".to_string(), json!(0));
        assert_eq!(optional_limit(&arguments, "limit", 5, 20), 5);
    }

    #[test]
    fn schemas_follow_registration_order() {
        let registry = registry();
        let names: Vec<&str> = registry.schemas().iter().map(|schema| schema.name).collect();
        assert_eq!(names, vec!["search_records"]);
    }
}
