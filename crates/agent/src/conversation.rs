//! Conversation lifecycle and model-generated naming.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use aide_core::domain::conversation::{
    Conversation, ConversationId, Message, DEFAULT_CONVERSATION_NAME,
};
use aide_core::domain::owner::{Owner, OwnerId};
use aide_core::domain::task::TaskStatus;
use aide_core::errors::{ApplicationError, DomainError};
use aide_db::repositories::{
    ConversationRepository, MessageRepository, RepositoryError, TaskRepository,
};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError, ToolChoice};

pub const DEFAULT_CHAT_NAME: &str = "Default Chat";

const NAMING_WINDOW: usize = 10;
const NAMING_EXCERPT_CHARS: usize = 200;
const NAMING_MAX_CHARS: usize = 60;
const NAMING_INSTRUCTION: &str = "You are a helpful assistant that generates concise, descriptive names for chat conversations. Generate a short name (2-5 words) that captures the main topic or purpose of the conversation. Respond with ONLY the chat name, no quotes or extra text.";

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Chat not found or not authorized")]
    NotFound,
    #[error("chat name must not be empty")]
    EmptyName,
    #[error("conversation storage failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl From<ConversationError> for ApplicationError {
    fn from(value: ConversationError) -> Self {
        match value {
            ConversationError::NotFound => {
                Self::Domain(DomainError::NotFound { entity: "conversation" })
            }
            ConversationError::EmptyName => Self::Domain(DomainError::MissingField("name")),
            ConversationError::Repository(error) => Self::Persistence(error.to_string()),
            ConversationError::Llm(error) => Self::Integration(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub active_tasks: usize,
}

pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    tasks: Arc<dyn TaskRepository>,
    llm: Arc<dyn LlmClient>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        tasks: Arc<dyn TaskRepository>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self { conversations, messages, tasks, llm }
    }

    pub async fn create(
        &self,
        owner_id: &OwnerId,
        name: Option<&str>,
    ) -> Result<Conversation, ConversationError> {
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_NAME);
        let conversation = Conversation::new(owner_id.clone(), name);
        self.conversations.save(conversation.clone()).await?;

        info!(
            event_name = "conversation.created",
            owner_id = %owner_id,
            conversation_id = %conversation.id,
            "conversation created"
        );
        Ok(conversation)
    }

    /// Missing and foreign conversations are indistinguishable to the caller.
    pub async fn get(
        &self,
        owner_id: &OwnerId,
        id: &ConversationId,
    ) -> Result<Conversation, ConversationError> {
        self.conversations
            .find(id)
            .await?
            .filter(|conversation| &conversation.owner_id == owner_id)
            .ok_or(ConversationError::NotFound)
    }

    /// Most recently active first, each with its number of waiting tasks.
    pub async fn list(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<ConversationSummary>, ConversationError> {
        let conversations = self.conversations.list_for_owner(owner_id).await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let active_tasks = self
                .tasks
                .list_for_conversation(&conversation.id)
                .await?
                .iter()
                .filter(|task| task.status == TaskStatus::Waiting)
                .count();
            summaries.push(ConversationSummary { conversation, active_tasks });
        }
        Ok(summaries)
    }

    pub async fn history(
        &self,
        owner_id: &OwnerId,
        id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ConversationError> {
        let conversation = self.get(owner_id, id).await?;
        Ok(self.messages.list_for_conversation(&conversation.id, limit).await?)
    }

    pub async fn rename(
        &self,
        owner_id: &OwnerId,
        id: &ConversationId,
        name: &str,
    ) -> Result<Conversation, ConversationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConversationError::EmptyName);
        }
        let mut conversation = self.get(owner_id, id).await?;
        conversation.name = name.to_string();
        self.conversations.save(conversation.clone()).await?;
        Ok(conversation)
    }

    /// Removes the conversation together with its messages and tasks.
    pub async fn delete(
        &self,
        owner_id: &OwnerId,
        id: &ConversationId,
    ) -> Result<(), ConversationError> {
        let conversation = self.get(owner_id, id).await?;
        if !self.conversations.delete(&conversation.id).await? {
            return Err(ConversationError::NotFound);
        }

        info!(
            event_name = "conversation.deleted",
            owner_id = %owner_id,
            conversation_id = %conversation.id,
            "conversation deleted"
        );
        Ok(())
    }

    pub async fn get_or_create_default(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Conversation, ConversationError> {
        if let Some(existing) = self.conversations.find_by_name(owner_id, DEFAULT_CHAT_NAME).await? {
            return Ok(existing);
        }
        self.create(owner_id, Some(DEFAULT_CHAT_NAME)).await
    }

    /// Names a `New Chat` conversation once it has at least two messages.
    /// Returns the new name when one was applied.
    pub async fn auto_name(
        &self,
        owner: &Owner,
        id: &ConversationId,
    ) -> Result<Option<String>, ConversationError> {
        let conversation = self.get(&owner.id, id).await?;
        if !conversation.has_default_name() {
            return Ok(None);
        }
        let recent = self.messages.list_for_conversation(id, Some(NAMING_WINDOW)).await?;
        if recent.len() < 2 {
            return Ok(None);
        }

        let transcript = recent
            .iter()
            .map(|message| {
                let excerpt: String = message.content.chars().take(NAMING_EXCERPT_CHARS).collect();
                format!("{}: {excerpt}", message.role.as_str())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::System(NAMING_INSTRUCTION.to_string()),
                ChatMessage::User(format!(
                    "Generate a chat name for this conversation:\n\n{transcript}"
                )),
            ],
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            temperature: 0.7,
            max_tokens: Some(20),
        };

        let completion = self.llm.complete(request).await?;
        let Some(name) = completion.non_empty_text().map(clean_name).filter(|name| !name.is_empty())
        else {
            debug!(
                event_name = "conversation.auto_name.empty",
                conversation_id = %id,
                "model returned no usable name"
            );
            return Ok(None);
        };

        let renamed = self.rename(&owner.id, id, &name).await?;
        info!(
            event_name = "conversation.auto_named",
            owner_id = %owner.id,
            conversation_id = %id,
            name = %renamed.name,
            "conversation named"
        );
        Ok(Some(renamed.name))
    }
}

fn clean_name(raw: &str) -> String {
    let name = raw
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    name.chars().take(NAMING_MAX_CHARS).collect()
}
