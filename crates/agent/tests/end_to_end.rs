//! "Email Jane and tell me when she replies", from the chat turn through the
//! ingestion sweep that posts the notification.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use aide_agent::capabilities::{
    CapabilityError, DisabledCrm, Mailbox, OutgoingMessage, SentMessage,
};
use aide_agent::llm::{Completion, CompletionRequest, LlmClient, LlmError, ToolCallRequest};
use aide_agent::{
    AgentRuntime, IngestionLoop, IngestionSettings, RuntimeSettings, TaskCorrelationEngine,
    ToolDependencies, ToolRegistry,
};
use aide_core::domain::conversation::{Conversation, MessageContext, MessageRole};
use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::{Owner, OwnerCredentials};
use aide_core::domain::task::TaskStatus;
use aide_core::retrieval::{Embedder, EmbeddingError, RetrievalEngine};
use aide_db::repositories::{
    ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
    InMemoryOwnerRepository, InMemoryRecordRepository, InMemoryTaskRepository, MessageRepository,
    OwnerRepository, TaskRepository,
};

struct Script(Mutex<VecDeque<Completion>>);

#[async_trait]
impl LlmClient for Script {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        self.0
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| LlmError::Transport("script exhausted".to_string()))
    }
}

struct FlatEmbedder;

#[async_trait]
impl Embedder for FlatEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

#[derive(Default)]
struct Inbox {
    sent: Mutex<Vec<OutgoingMessage>>,
    incoming: Mutex<Vec<InboundEvent>>,
}

#[async_trait]
impl Mailbox for Inbox {
    async fn fetch_events_since(
        &self,
        _owner: &Owner,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, CapabilityError> {
        let incoming = self.incoming.lock().expect("incoming lock");
        Ok(incoming.iter().filter(|event| event.received_at > since).take(limit).cloned().collect())
    }

    async fn send(
        &self,
        _owner: &Owner,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, CapabilityError> {
        self.sent.lock().expect("sent lock").push(message.clone());
        Ok(SentMessage { id: "msg-1".to_string(), thread_id: Some("thread-1".to_string()) })
    }
}

fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest { id: id.to_string(), name: name.to_string(), arguments: arguments.to_string() }
}

#[tokio::test]
async fn email_jane_and_report_her_reply() {
    let owners = Arc::new(InMemoryOwnerRepository::default());
    let conversations = Arc::new(InMemoryConversationRepository::default());
    let messages = Arc::new(InMemoryMessageRepository::default());
    let tasks = Arc::new(InMemoryTaskRepository::default());
    let records = Arc::new(InMemoryRecordRepository::default());
    let mailbox = Arc::new(Inbox::default());

    let owner = Owner::new("owner-1", "me@corp.com").with_credentials(OwnerCredentials {
        mailbox_token: Some(SecretString::from("token".to_string())),
        crm_token: None,
    });
    owners.save(owner.clone()).await.expect("save owner");
    let conversation = Conversation::new(owner.id.clone(), "Reports");
    conversations.save(conversation.clone()).await.expect("save conversation");

    let llm = Arc::new(Script(Mutex::new(VecDeque::from(vec![
        Completion::tool_calls(vec![call(
            "call-1",
            "send_message",
            r#"{"to":"jane@acme.com","to_name":"Jane","subject":"Q3 report","body":"Hi Jane, could you send the Q3 report?"}"#,
        )]),
        Completion::tool_calls(vec![call(
            "call-2",
            "register_task",
            r#"{"description":"Wait for Jane to send the Q3 report","expected_counterparty":"jane@acme.com","counterparty_name":"Jane"}"#,
        )]),
        Completion::text("I've emailed Jane and will let you know when she replies."),
        Completion::text("Jane attached the Q3 report."),
    ]))));

    let correlation = Arc::new(
        TaskCorrelationEngine::new(tasks.clone(), messages.clone(), conversations.clone(), llm.clone())
            .expect("correlation engine"),
    );
    let retrieval = RetrievalEngine::new(Arc::new(FlatEmbedder), records.clone());
    let registry = ToolRegistry::with_catalog(ToolDependencies {
        records: records.clone(),
        retrieval: retrieval.clone(),
        mailbox: mailbox.clone(),
        crm: Arc::new(DisabledCrm),
        tasks: correlation.clone(),
    });
    let runtime = AgentRuntime::new(
        conversations.clone(),
        messages.clone(),
        retrieval,
        llm.clone(),
        Arc::new(registry),
        RuntimeSettings::default(),
    );

    let outcome = runtime
        .handle_turn(&owner, &conversation.id, "Email Jane for the Q3 report and tell me when she replies")
        .await
        .expect("turn");

    assert_eq!(outcome.answer, "I've emailed Jane and will let you know when she replies.");
    assert_eq!(outcome.tools_invoked.len(), 2);
    assert!(outcome.tools_invoked.iter().all(|usage| usage.success));
    assert_eq!(mailbox.sent.lock().expect("sent").len(), 1);

    let waiting = tasks.list_for_conversation(&conversation.id).await.expect("tasks");
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].status, TaskStatus::Waiting);

    mailbox.incoming.lock().expect("incoming").push(InboundEvent {
        external_id: "reply-1".to_string(),
        sender: "Jane@Acme.com".to_string(),
        sender_name: Some("Jane Doe".to_string()),
        subject: "Re: Q3 report".to_string(),
        body: "Here it is.".to_string(),
        received_at: Utc::now() - Duration::minutes(1),
    });

    let ingestion = IngestionLoop::new(
        owners.clone(),
        mailbox.clone(),
        records.clone(),
        correlation.clone(),
        IngestionSettings::default(),
    );
    let report = ingestion.run_cycle().await;
    assert_eq!(report.tasks_completed, 1);

    let completed = tasks.find(&waiting[0].id).await.expect("find").expect("task");
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.linked_event_id.as_deref(), Some("reply-1"));

    let history = messages.list_for_conversation(&conversation.id, None).await.expect("history");
    let notification = history.last().expect("notification");
    assert_eq!(notification.role, MessageRole::Assistant);
    assert!(notification.content.contains("Jane attached the Q3 report."));
    assert!(matches!(
        notification.context,
        Some(MessageContext::TaskCompletion { automated: true, .. })
    ));

    // The same reply seen again completes nothing and posts nothing.
    owners.mark_checked(&owner.id, Utc::now() - Duration::hours(1)).await.expect("rewind");
    let again = ingestion.run_cycle().await;
    assert_eq!(again.tasks_completed, 0);
    assert_eq!(
        messages.count_for_conversation(&conversation.id).await.expect("count"),
        history.len() as u32
    );
}
