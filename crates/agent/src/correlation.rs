//! Waiting-task registry that links inbound events back to conversations.

use std::sync::Arc;

use chrono::Utc;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{info, warn};

use aide_core::domain::conversation::{ConversationId, Message, MessageContext, MessageRole};
use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::OwnerId;
use aide_core::domain::task::{Task, TaskId, TaskStatistics, TaskStatus};
use aide_core::errors::{ApplicationError, DomainError};
use aide_core::tasks::{CompletionOutcome, NewTask, TaskError, TaskLifecycle};
use aide_db::repositories::{
    ConversationRepository, MessageRepository, RepositoryError, TaskRepository,
};

use crate::llm::LlmClient;

const NOTIFICATION_TEMPLATE: &str = "task_notification.md";
const NOTIFICATION_SOURCE: &str = "**Task Update: Response Received**

{{ counterparty }} has responded to your email!

**Subject:** {{ subject }}

**Summary:**
{{ summary }}

**From:** {{ sender }}
**Date:** {{ received_at }}

You can ask me to read the full email or take further actions.";

const SUMMARY_BODY_CHARS: usize = 1000;
const SUMMARY_TEMPERATURE: f32 = 0.5;

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("task storage failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error("notification rendering failed: {0}")]
    Template(String),
}

impl From<CorrelationError> for ApplicationError {
    fn from(value: CorrelationError) -> Self {
        match value {
            CorrelationError::Task(error) => Self::Domain(DomainError::from(error)),
            CorrelationError::Repository(error) => Self::Persistence(error.to_string()),
            CorrelationError::Template(message) => Self::Domain(DomainError::InvariantViolation(message)),
        }
    }
}

pub struct TaskCorrelationEngine {
    tasks: Arc<dyn TaskRepository>,
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    llm: Arc<dyn LlmClient>,
    lifecycle: TaskLifecycle,
    templates: Tera,
}

impl TaskCorrelationEngine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, CorrelationError> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(NOTIFICATION_TEMPLATE, NOTIFICATION_SOURCE)
            .map_err(|error| CorrelationError::Template(error.to_string()))?;

        Ok(Self {
            tasks,
            messages,
            conversations,
            llm,
            lifecycle: TaskLifecycle::new(),
            templates,
        })
    }

    /// Always creates a new waiting task; duplicates are kept.
    pub async fn register(&self, new_task: NewTask) -> Result<Task, CorrelationError> {
        let task = self.lifecycle.register(new_task)?;
        self.tasks.save(task.clone()).await?;

        info!(
            event_name = "task.registered",
            task_id = %task.id,
            owner_id = %task.owner_id,
            conversation_id = %task.conversation_id,
            expected_counterparty = %task.expected_counterparty,
            "waiting task registered"
        );
        Ok(task)
    }

    /// Waiting tasks of `owner_id` expecting the event's sender.
    pub async fn match_event(
        &self,
        event: &InboundEvent,
        owner_id: &OwnerId,
    ) -> Result<Vec<Task>, CorrelationError> {
        let candidates =
            self.tasks.list_waiting_for_counterparty(owner_id, &event.sender_key()).await?;
        Ok(candidates
            .into_iter()
            .filter(|task| self.lifecycle.matches(task, event, owner_id))
            .collect())
    }

    /// Completes the task and posts a notification into its conversation.
    /// Completing a terminal task changes nothing and posts nothing. The
    /// notification is stored before the task turns terminal, so a failed
    /// post leaves the task waiting for the next cycle.
    pub async fn complete(
        &self,
        task_id: &TaskId,
        event: &InboundEvent,
    ) -> Result<CompletionOutcome, CorrelationError> {
        let task = self
            .tasks
            .find(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.clone()))?;

        let completed = match self.lifecycle.complete(task, &event.external_id, Utc::now()) {
            CompletionOutcome::Completed(task) => task,
            outcome @ CompletionOutcome::AlreadyTerminal(_) => return Ok(outcome),
        };

        let summary = self.summarize(event).await;
        let content = self.render_notification(&completed, event, &summary)?;
        let message = Message::new(
            completed.conversation_id.clone(),
            completed.owner_id.clone(),
            MessageRole::Assistant,
            content,
            Some(MessageContext::TaskCompletion {
                task_id: completed.id.clone(),
                event_id: event.external_id.clone(),
                automated: true,
            }),
        );
        let posted_at = message.created_at;
        self.messages.append(message).await?;
        self.tasks.save(completed.clone()).await?;
        if let Err(error) = self.conversations.touch(&completed.conversation_id, posted_at).await {
            warn!(
                event_name = "task.notification.touch_failed",
                conversation_id = %completed.conversation_id,
                error = %error,
                "conversation timestamp not updated"
            );
        }

        info!(
            event_name = "task.completed",
            task_id = %completed.id,
            owner_id = %completed.owner_id,
            conversation_id = %completed.conversation_id,
            event_id = %event.external_id,
            "task completed and notification posted"
        );
        Ok(CompletionOutcome::Completed(completed))
    }

    pub async fn cancel(&self, task_id: &TaskId, owner_id: &OwnerId) -> Result<Task, CorrelationError> {
        let task = self
            .tasks
            .find(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.clone()))?;
        let cancelled = self.lifecycle.cancel(task, owner_id)?;
        self.tasks.save(cancelled.clone()).await?;

        info!(
            event_name = "task.cancelled",
            task_id = %cancelled.id,
            owner_id = %owner_id,
            "task cancelled"
        );
        Ok(cancelled)
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Task>, CorrelationError> {
        Ok(self.tasks.list_for_conversation(conversation_id).await?)
    }

    pub async fn list_waiting_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Task>, CorrelationError> {
        Ok(self.tasks.list_for_owner(owner_id, Some(TaskStatus::Waiting)).await?)
    }

    pub async fn statistics(&self, owner_id: &OwnerId) -> Result<TaskStatistics, CorrelationError> {
        Ok(self.tasks.statistics(owner_id).await?)
    }

    async fn summarize(&self, event: &InboundEvent) -> String {
        let body: String = event.body.chars().take(SUMMARY_BODY_CHARS).collect();
        let body = if body.trim().is_empty() { "No content".to_string() } else { body };
        let prompt = format!(
            "Summarize this email response in 2-3 sentences. Focus on key points and action items.\n\n\
             From: {}\nSubject: {}\nDate: {}\n\nBody:\n{body}\n\nSummary:",
            event.display_sender(),
            event.subject,
            event.received_at.to_rfc3339(),
        );

        match self.llm.generate(&prompt, SUMMARY_TEMPERATURE).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => fallback_summary(event),
            Err(error) => {
                warn!(
                    event_name = "task.summary.fallback",
                    event_id = %event.external_id,
                    error = %error,
                    "summary generation failed; using fallback"
                );
                fallback_summary(event)
            }
        }
    }

    fn render_notification(
        &self,
        task: &Task,
        event: &InboundEvent,
        summary: &str,
    ) -> Result<String, CorrelationError> {
        let mut context = Context::new();
        context.insert(
            "counterparty",
            task.counterparty_name.as_deref().unwrap_or(&task.expected_counterparty),
        );
        context.insert("subject", &event.subject);
        context.insert("summary", summary);
        context.insert("sender", event.display_sender());
        context.insert("received_at", &event.received_at.format("%Y-%m-%d %H:%M UTC").to_string());

        self.templates
            .render(NOTIFICATION_TEMPLATE, &context)
            .map_err(|error| CorrelationError::Template(error.to_string()))
    }
}

pub fn fallback_summary(event: &InboundEvent) -> String {
    format!("{} responded: {}", event.display_sender(), event.subject)
}
