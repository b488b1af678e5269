use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use aide_core::domain::task::{Task, TaskId, TaskStatus};
use aide_core::retrieval::{RetrievalEngine, SearchOptions, DEFAULT_MIN_SIMILARITY};
use aide_core::tasks::NewTask;

use crate::correlation::TaskCorrelationEngine;

use super::{optional_limit, optional_str, required_str, Tool, ToolContext, ToolError, ToolKind};

pub struct SemanticSearchTool {
    retrieval: RetrievalEngine,
}

impl SemanticSearchTool {
    pub fn new(retrieval: RetrievalEngine) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Tool for SemanticSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SemanticSearch
    }

    fn description(&self) -> &'static str {
        "Semantic search across emails, contacts, and notes using embeddings. Use this for \
         queries that need understanding of context and meaning."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language query" },
                "limit": { "type": "number", "description": "Maximum number of results (default: 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let options = SearchOptions::with_limit(
            optional_limit(arguments, "limit", 5, 20),
            DEFAULT_MIN_SIMILARITY,
        );
        let items = self.retrieval.search(&context.owner.id, query, &options).await?;

        let results: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "type": item.entity_type.as_str(),
                    "id": item.source_id,
                    "similarity": item.similarity,
                    "snippet": item.snippet,
                    "content": item.body,
                })
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }
}

pub struct RegisterTaskTool {
    tasks: Arc<TaskCorrelationEngine>,
}

impl RegisterTaskTool {
    pub fn new(tasks: Arc<TaskCorrelationEngine>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for RegisterTaskTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RegisterTask
    }

    fn description(&self) -> &'static str {
        "Create a task that waits for a reply from a specific person. Use it when the user asks \
         to be told when someone responds, e.g. after sending them an email."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Clear description of what this task is waiting for"
                },
                "expected_counterparty": {
                    "type": "string",
                    "description": "Email address of the person we expect to hear from"
                },
                "counterparty_name": {
                    "type": "string",
                    "description": "Name of the person we're waiting to hear from"
                },
                "task_type": {
                    "type": "string",
                    "description": "Kind of task (default: email_response)"
                }
            },
            "required": ["description", "expected_counterparty"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let conversation_id = context
            .conversation_id
            .clone()
            .ok_or(ToolError::Precondition("Tasks can only be created from an active conversation"))?;

        let mut task_context = Map::new();
        task_context.insert("created_by".to_string(), json!("agent"));
        task_context.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));

        let counterparty_name = optional_str(arguments, "counterparty_name").map(str::to_string);
        let task = self
            .tasks
            .register(NewTask {
                conversation_id,
                owner_id: context.owner.id.clone(),
                description: required_str(arguments, "description")?.to_string(),
                expected_counterparty: required_str(arguments, "expected_counterparty")?.to_string(),
                counterparty_name: counterparty_name.clone(),
                task_type: optional_str(arguments, "task_type").map(str::to_string),
                context: task_context,
            })
            .await?;

        Ok(json!({
            "task": task_json(&task),
            "message": format!(
                "Task created. I'll monitor for responses from {} and notify you when they respond.",
                counterparty_name.as_deref().unwrap_or(&task.expected_counterparty)
            ),
        }))
    }
}

pub struct ListTasksTool {
    tasks: Arc<TaskCorrelationEngine>,
}

impl ListTasksTool {
    pub fn new(tasks: Arc<TaskCorrelationEngine>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for ListTasksTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ListTasks
    }

    fn description(&self) -> &'static str {
        "List tasks waiting for replies, either for this conversation or across all of the \
         user's conversations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "scope": {
                    "type": "string",
                    "enum": ["conversation", "owner"],
                    "description": "`conversation` (default) or `owner` for all waiting tasks"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let scope = optional_str(arguments, "scope").unwrap_or("conversation");
        let tasks = match (scope, &context.conversation_id) {
            ("conversation", Some(conversation_id)) => {
                self.tasks.list_for_conversation(conversation_id).await?
            }
            ("conversation", None) | ("owner", _) => {
                self.tasks.list_waiting_for_owner(&context.owner.id).await?
            }
            (other, _) => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unsupported scope `{other}`; use `conversation` or `owner`"
                )))
            }
        };

        let active = tasks.iter().filter(|task| task.status == TaskStatus::Waiting).count();
        let completed = tasks.iter().filter(|task| task.status == TaskStatus::Completed).count();
        let message = if active > 0 {
            format!("You have {active} active task(s) waiting for responses.")
        } else {
            "No active tasks at the moment.".to_string()
        };

        Ok(json!({
            "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
            "summary": { "total": tasks.len(), "active": active, "completed": completed },
            "message": message,
        }))
    }
}

pub struct CancelTaskTool {
    tasks: Arc<TaskCorrelationEngine>,
}

impl CancelTaskTool {
    pub fn new(tasks: Arc<TaskCorrelationEngine>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for CancelTaskTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CancelTask
    }

    fn description(&self) -> &'static str {
        "Cancel a waiting task so it no longer watches for a reply."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string", "description": "Id of the task to cancel" }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let task_id = TaskId(required_str(arguments, "task_id")?.to_string());
        let task = self.tasks.cancel(&task_id, &context.owner.id).await?;

        Ok(json!({
            "task": task_json(&task),
            "message": format!("Task cancelled: {}", task.description),
        }))
    }
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "description": task.description,
        "expected_counterparty": task.expected_counterparty,
        "counterparty_name": task.counterparty_name,
        "status": task.status.as_str(),
        "task_type": task.task_type,
        "created_at": task.created_at.to_rfc3339(),
        "completed_at": task.completed_at.map(|value| value.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use aide_core::domain::conversation::{Conversation, ConversationId};
    use aide_core::domain::owner::Owner;
    use aide_core::retrieval::RetrievalEngine;
    use aide_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
        InMemoryRecordRepository, InMemoryTaskRepository,
    };

    use super::{CancelTaskTool, ListTasksTool, RegisterTaskTool, SemanticSearchTool};
    use crate::correlation::TaskCorrelationEngine;
    use crate::test_support::{ConstantEmbedder, ScriptedLlm};
    use crate::tools::{ToolContext, ToolRegistry};

    async fn setup() -> (ToolRegistry, ConversationId) {
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let conversation = Conversation::new(Owner::new("owner-1", "o@corp.com").id, "Outreach");
        conversations.save(conversation.clone()).await.expect("save conversation");
        let engine = Arc::new(
            TaskCorrelationEngine::new(
                Arc::new(InMemoryTaskRepository::default()),
                Arc::new(InMemoryMessageRepository::default()),
                conversations,
                Arc::new(ScriptedLlm::new(Vec::new())),
            )
            .expect("engine"),
        );
        let records = Arc::new(InMemoryRecordRepository::default());

        let mut registry = ToolRegistry::default();
        registry.register(SemanticSearchTool::new(RetrievalEngine::new(
            Arc::new(ConstantEmbedder(vec![1.0, 0.0])),
            records,
        )));
        registry.register(RegisterTaskTool::new(engine.clone()));
        registry.register(ListTasksTool::new(engine.clone()));
        registry.register(CancelTaskTool::new(engine));
        (registry, conversation.id)
    }

    fn context(conversation_id: Option<ConversationId>) -> ToolContext {
        ToolContext { owner: Owner::new("owner-1", "o@corp.com"), conversation_id }
    }

    #[tokio::test]
    async fn register_requires_active_conversation() {
        let (registry, _) = setup().await;
        let invocation = registry
            .execute(
                "register_task",
                r#"{"description":"Wait for Jane","expected_counterparty":"jane@acme.com"}"#,
                &context(None),
            )
            .await;

        assert!(!invocation.success);
        assert_eq!(
            invocation.result["error"],
            json!("Tasks can only be created from an active conversation")
        );
    }

    #[tokio::test]
    async fn register_list_and_cancel() {
        let (registry, conversation_id) = setup().await;
        let ctx = context(Some(conversation_id));

        let created = registry
            .execute(
                "register_task",
                r#"{"description":"Wait for Jane","expected_counterparty":"Jane@Acme.com","counterparty_name":"Jane"}"#,
                &ctx,
            )
            .await;
        assert!(created.success);
        assert_eq!(created.result["task"]["expected_counterparty"], json!("jane@acme.com"));
        let task_id = created.result["task"]["id"].as_str().expect("task id").to_string();

        let listed = registry.execute("list_tasks", "{}", &ctx).await;
        assert_eq!(listed.result["summary"], json!({ "total": 1, "active": 1, "completed": 0 }));

        let cancel_args = json!({ "task_id": task_id }).to_string();
        let cancelled = registry.execute("cancel_task", &cancel_args, &ctx).await;
        assert!(cancelled.success);
        assert_eq!(cancelled.result["task"]["status"], json!("cancelled"));

        let again = registry.execute("cancel_task", &cancel_args, &ctx).await;
        assert!(!again.success);

        let waiting = registry.execute("list_tasks", r#"{"scope":"owner"}"#, &ctx).await;
        assert_eq!(waiting.result["summary"]["total"], json!(0));
        assert_eq!(waiting.result["message"], json!("No active tasks at the moment."));
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_reports_not_found() {
        let (registry, conversation_id) = setup().await;
        let invocation = registry
            .execute("cancel_task", r#"{"task_id":"missing"}"#, &context(Some(conversation_id)))
            .await;

        assert!(!invocation.success);
        assert_eq!(invocation.result["error"], json!("Task not found or not authorized"));
    }

    #[tokio::test]
    async fn semantic_search_with_no_embeddings_returns_empty() {
        let (registry, _) = setup().await;
        let invocation =
            registry.execute("semantic_search", r#"{"query":"budget"}"#, &context(None)).await;

        assert!(invocation.success);
        assert_eq!(invocation.result["count"], json!(0));
    }
}
