//! Pure state machine for waiting tasks.
//!
//! `waiting` is the only non-terminal state. Persistence and notification are
//! layered on top by the correlation engine; every transition here is a plain
//! value-in, value-out function so it can be tested without storage.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::event::InboundEvent;
use crate::domain::owner::OwnerId;
use crate::domain::task::{Task, TaskId, TaskStatus, DEFAULT_TASK_TYPE};
use crate::errors::DomainError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found or not authorized")]
    NotFound(TaskId),
    #[error("task {task_id} is already {status:?}")]
    InvalidState { task_id: TaskId, status: TaskStatus },
    #[error("expected counterparty is required")]
    MissingCounterparty,
}

impl From<TaskError> for DomainError {
    fn from(value: TaskError) -> Self {
        match value {
            TaskError::NotFound(_) => Self::NotFound { entity: "task" },
            TaskError::InvalidState { status, .. } => {
                Self::InvalidTaskTransition { from: status, to: TaskStatus::Cancelled }
            }
            TaskError::MissingCounterparty => Self::MissingField("expected_counterparty"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub conversation_id: ConversationId,
    pub owner_id: OwnerId,
    pub description: String,
    pub expected_counterparty: String,
    pub counterparty_name: Option<String>,
    pub task_type: Option<String>,
    pub context: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompletionOutcome {
    Completed(Task),
    /// The task was already terminal; nothing changed.
    AlreadyTerminal(Task),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TaskLifecycle;

impl TaskLifecycle {
    pub fn new() -> Self {
        Self
    }

    pub fn register(&self, new_task: NewTask) -> Result<Task, TaskError> {
        let counterparty = new_task.expected_counterparty.trim().to_lowercase();
        if counterparty.is_empty() {
            return Err(TaskError::MissingCounterparty);
        }

        let now = Utc::now();
        let task_type = new_task
            .task_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string());

        Ok(Task {
            id: TaskId(Uuid::new_v4().to_string()),
            conversation_id: new_task.conversation_id,
            owner_id: new_task.owner_id,
            status: TaskStatus::Waiting,
            task_type,
            description: new_task.description,
            expected_counterparty: counterparty,
            counterparty_name: new_task.counterparty_name.filter(|name| !name.trim().is_empty()),
            linked_event_id: None,
            context: new_task.context,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// True when `task` is waiting, belongs to `owner_id` and expects `event`'s
    /// sender. Addresses compare exactly after case folding.
    pub fn matches(&self, task: &Task, event: &InboundEvent, owner_id: &OwnerId) -> bool {
        task.status == TaskStatus::Waiting
            && &task.owner_id == owner_id
            && task.expected_counterparty.to_lowercase() == event.sender_key()
    }

    pub fn complete(
        &self,
        mut task: Task,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> CompletionOutcome {
        if task.status.is_terminal() {
            return CompletionOutcome::AlreadyTerminal(task);
        }

        task.status = TaskStatus::Completed;
        task.linked_event_id = Some(event_id.to_string());
        task.completed_at = Some(at);
        task.updated_at = at;
        CompletionOutcome::Completed(task)
    }

    pub fn cancel(&self, mut task: Task, owner_id: &OwnerId) -> Result<Task, TaskError> {
        if &task.owner_id != owner_id {
            return Err(TaskError::NotFound(task.id));
        }
        if task.status.is_terminal() {
            return Err(TaskError::InvalidState { task_id: task.id, status: task.status });
        }

        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.updated_at = now;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use super::{CompletionOutcome, NewTask, TaskError, TaskLifecycle};
    use crate::domain::conversation::ConversationId;
    use crate::domain::event::InboundEvent;
    use crate::domain::owner::OwnerId;
    use crate::domain::task::{Task, TaskStatus};

    fn owner() -> OwnerId {
        OwnerId("owner-1".to_string())
    }

    fn waiting_task(counterparty: &str) -> Task {
        TaskLifecycle::new()
            .register(NewTask {
                conversation_id: ConversationId("conv-1".to_string()),
                owner_id: owner(),
                description: "Wait for the report".to_string(),
                expected_counterparty: counterparty.to_string(),
                counterparty_name: Some("Jane".to_string()),
                task_type: None,
                context: Map::new(),
            })
            .expect("register")
    }

    fn event_from(sender: &str) -> InboundEvent {
        InboundEvent {
            external_id: "evt-1".to_string(),
            sender: sender.to_string(),
            sender_name: None,
            subject: "Re: report".to_string(),
            body: "Attached.".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn register_lowercases_counterparty_and_defaults_type() {
        let task = waiting_task("  Jane@Acme.COM ");

        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.expected_counterparty, "jane@acme.com");
        assert_eq!(task.task_type, "email_response");
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn register_rejects_blank_counterparty() {
        let result = TaskLifecycle::new().register(NewTask {
            conversation_id: ConversationId("conv-1".to_string()),
            owner_id: owner(),
            description: "nobody".to_string(),
            expected_counterparty: "   ".to_string(),
            counterparty_name: None,
            task_type: None,
            context: Map::new(),
        });

        assert_eq!(result, Err(TaskError::MissingCounterparty));
    }

    #[test]
    fn matching_is_case_insensitive_and_exact() {
        let lifecycle = TaskLifecycle::new();
        let task = waiting_task("a@x.com");

        assert!(lifecycle.matches(&task, &event_from("A@X.COM"), &owner()));
        assert!(!lifecycle.matches(&task, &event_from("b@x.com"), &owner()));
        assert!(!lifecycle.matches(&task, &event_from("a@x.com.evil"), &owner()));
    }

    #[test]
    fn matching_never_crosses_owners() {
        let task = waiting_task("a@x.com");
        let other = OwnerId("owner-2".to_string());

        assert!(!TaskLifecycle::new().matches(&task, &event_from("a@x.com"), &other));
    }

    #[test]
    fn terminal_tasks_never_match() {
        let lifecycle = TaskLifecycle::new();
        let completed = match lifecycle.complete(waiting_task("a@x.com"), "evt-1", Utc::now()) {
            CompletionOutcome::Completed(task) => task,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let cancelled = lifecycle.cancel(waiting_task("a@x.com"), &owner()).expect("cancel");

        assert!(!lifecycle.matches(&completed, &event_from("a@x.com"), &owner()));
        assert!(!lifecycle.matches(&cancelled, &event_from("a@x.com"), &owner()));
    }

    #[test]
    fn complete_links_event_and_is_idempotent() {
        let lifecycle = TaskLifecycle::new();
        let now = Utc::now();

        let completed = match lifecycle.complete(waiting_task("a@x.com"), "evt-7", now) {
            CompletionOutcome::Completed(task) => task,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(completed.status, TaskStatus::Completed);
        assert_eq!(completed.linked_event_id.as_deref(), Some("evt-7"));
        assert_eq!(completed.completed_at, Some(now));

        let again = lifecycle.complete(completed.clone(), "evt-8", Utc::now());
        assert_eq!(again, CompletionOutcome::AlreadyTerminal(completed));
    }

    #[test]
    fn cancel_of_completed_task_fails_without_change() {
        let lifecycle = TaskLifecycle::new();
        let completed = match lifecycle.complete(waiting_task("a@x.com"), "evt-1", Utc::now()) {
            CompletionOutcome::Completed(task) => task,
            other => panic!("unexpected outcome: {other:?}"),
        };

        let error = lifecycle.cancel(completed.clone(), &owner()).expect_err("terminal");

        assert_eq!(
            error,
            TaskError::InvalidState { task_id: completed.id.clone(), status: TaskStatus::Completed }
        );
        assert_eq!(completed.status, TaskStatus::Completed);
    }

    #[test]
    fn cancel_by_another_owner_is_not_found() {
        let task = waiting_task("a@x.com");
        let error = TaskLifecycle::new()
            .cancel(task.clone(), &OwnerId("intruder".to_string()))
            .expect_err("wrong owner");

        assert_eq!(error, TaskError::NotFound(task.id));
        assert_eq!(error.to_string(), "Task not found or not authorized");
    }
}
