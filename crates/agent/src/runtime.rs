use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use aide_core::domain::conversation::{
    ConversationId, Message, MessageContext, MessageRole, SourceRef, ToolUsage,
};
use aide_core::domain::owner::Owner;
use aide_core::domain::retrieval::RetrievedItem;
use aide_core::errors::{ApplicationError, DomainError};
use aide_core::retrieval::{format_context, RetrievalEngine, RetrievalError, SearchOptions};
use aide_db::repositories::{ConversationRepository, MessageRepository, RepositoryError};

use crate::conversation::ConversationService;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError, ToolChoice};
use crate::tools::{ToolContext, ToolRegistry};

pub const MAX_ROUND_TRIPS: usize = 5;
pub const FALLBACK_ANSWER: &str = "I've completed the requested action.";
pub const APOLOGY: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant that helps users manage their emails, contacts, and business communications.

You have access to various tools that allow you to:
- Search and read emails, contacts, and notes
- Send emails from the user's mailbox
- Search for and create contacts in the CRM
- Perform semantic searches across all data
- Create tasks that wait for someone to reply, list them, and cancel them

When a user asks you to do something:
1. Analyze their request carefully
2. Use the appropriate tools to gather information or perform actions
3. Provide clear, helpful responses based on the tool results
4. If you need to use multiple tools to complete a task, do so
5. Always confirm actions that were taken (e.g., \"I've sent the email to...\")
6. When the user wants to know when someone replies, send the email first and then create a task for that person

Guidelines:
- Be concise but informative
- Reference specific details from emails/contacts when relevant
- If you can't find something, say so clearly
- When sending emails, expand on the user's brief instructions to create a professional message
- Always verify you have the correct contact information before sending emails";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub grounding: SearchOptions,
    pub history_limit: usize,
    pub temperature: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { grounding: SearchOptions::with_limit(5, 0.3), history_limit: 20, temperature: 0.7 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    pub sources: Vec<RetrievedItem>,
    pub tools_invoked: Vec<ToolUsage>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("conversation not found or not authorized")]
    ConversationNotFound,
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("conversation storage failed: {0}")]
    Repository(#[from] RepositoryError),
}

impl TurnError {
    /// Text shown to the user in place of an answer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ConversationNotFound => "Chat not found or not authorized.",
            Self::Retrieval(_) | Self::Llm(_) | Self::Repository(_) => APOLOGY,
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(value: TurnError) -> Self {
        match value {
            TurnError::ConversationNotFound => {
                Self::Domain(DomainError::NotFound { entity: "conversation" })
            }
            TurnError::Retrieval(error) => Self::Integration(error.to_string()),
            TurnError::Llm(error) => Self::Integration(error.to_string()),
            TurnError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

pub struct AgentRuntime {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    retrieval: RetrievalEngine,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    naming: Option<Arc<ConversationService>>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        retrieval: RetrievalEngine,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        settings: RuntimeSettings,
    ) -> Self {
        Self { conversations, messages, retrieval, llm, tools, naming: None, settings }
    }

    /// Enables best-effort naming of `New Chat` conversations after each turn.
    pub fn with_auto_naming(mut self, service: Arc<ConversationService>) -> Self {
        self.naming = Some(service);
        self
    }

    /// Runs one persisted turn: stores the user message, answers it and stores
    /// the answer with its sources and tool usage.
    pub async fn handle_turn(
        &self,
        owner: &Owner,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let conversation = self
            .conversations
            .find(conversation_id)
            .await?
            .filter(|conversation| conversation.owner_id == owner.id)
            .ok_or(TurnError::ConversationNotFound)?;

        let history = self
            .messages
            .list_for_conversation(&conversation.id, Some(self.settings.history_limit))
            .await?;

        let user_message =
            Message::new(conversation.id.clone(), owner.id.clone(), MessageRole::User, text, None);
        let asked_at = user_message.created_at;
        self.messages.append(user_message).await?;
        self.conversations.touch(&conversation.id, asked_at).await?;

        let outcome = match self.respond(owner, Some(&conversation.id), text, &history).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "agent.turn.failed",
                    owner_id = %owner.id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "turn failed; answering with apology"
                );
                return Err(error);
            }
        };

        let context = MessageContext::Turn {
            sources: outcome.sources.iter().map(SourceRef::from).collect(),
            tools: outcome.tools_invoked.clone(),
        };
        let answer = Message::new(
            conversation.id.clone(),
            owner.id.clone(),
            MessageRole::Assistant,
            outcome.answer.clone(),
            Some(context),
        );
        self.messages.append(answer).await?;
        self.conversations.touch(&conversation.id, Utc::now()).await?;

        if let Some(naming) = &self.naming {
            if let Err(error) = naming.auto_name(owner, &conversation.id).await {
                warn!(
                    event_name = "conversation.auto_name.failed",
                    owner_id = %owner.id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "conversation naming skipped"
                );
            }
        }

        Ok(outcome)
    }

    /// Grounds `query` with retrieval and runs the bounded tool loop. Nothing
    /// is persisted here.
    pub async fn respond(
        &self,
        owner: &Owner,
        conversation_id: Option<&ConversationId>,
        query: &str,
        history: &[Message],
    ) -> Result<TurnOutcome, TurnError> {
        let sources = self.retrieval.search(&owner.id, query, &self.settings.grounding).await?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::System(SYSTEM_INSTRUCTION.to_string()));
        messages.extend(history.iter().map(|message| match message.role {
            MessageRole::User => ChatMessage::User(message.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
        }));
        messages.push(ChatMessage::User(format!(
            "{query}\n\nContext from previous search:\n{}",
            format_context(&sources)
        )));

        let context = ToolContext { owner: owner.clone(), conversation_id: conversation_id.cloned() };
        let (answer, tools_invoked) = self.run_tool_loop(messages, &context).await?;

        info!(
            event_name = "agent.turn.finished",
            owner_id = %owner.id,
            conversation_id = conversation_id.map(|id| id.0.as_str()).unwrap_or("none"),
            sources = sources.len(),
            tools = tools_invoked.len(),
            "turn answered"
        );

        Ok(TurnOutcome { answer, sources, tools_invoked })
    }

    async fn run_tool_loop(
        &self,
        mut messages: Vec<ChatMessage>,
        context: &ToolContext,
    ) -> Result<(String, Vec<ToolUsage>), LlmError> {
        let schemas = self.tools.schemas();
        let request = |messages: &[ChatMessage]| CompletionRequest {
            messages: messages.to_vec(),
            tools: schemas.clone(),
            tool_choice: ToolChoice::Auto,
            temperature: self.settings.temperature,
            max_tokens: None,
        };

        let mut tools_invoked = Vec::new();
        let mut completion = self.llm.complete(request(&messages)).await?;
        let mut round_trips = 0;

        while !completion.tool_calls.is_empty() && round_trips < MAX_ROUND_TRIPS {
            round_trips += 1;
            let calls = completion.tool_calls.clone();
            messages.push(ChatMessage::Assistant {
                content: completion.text.clone(),
                tool_calls: calls.clone(),
            });

            for call in &calls {
                let invocation = self.tools.execute(&call.name, &call.arguments, context).await;
                tools_invoked.push(invocation.usage());
                messages.push(ChatMessage::Tool {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: invocation.result.to_string(),
                });
            }

            completion = self.llm.complete(request(&messages)).await?;
        }

        if !completion.tool_calls.is_empty() {
            warn!(
                event_name = "agent.tool_loop.exhausted",
                owner_id = %context.owner.id,
                round_trips,
                "tool round-trip limit reached; remaining calls ignored"
            );
        }

        let answer =
            completion.non_empty_text().map(str::to_string).unwrap_or_else(|| FALLBACK_ANSWER.to_string());
        Ok((answer, tools_invoked))
    }
}
