use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::owner::OwnerId;
use crate::domain::retrieval::{EntityType, RetrievedItem};
use crate::domain::task::TaskId;

pub const DEFAULT_CONVERSATION_NAME: &str = "New Chat";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: OwnerId,
    pub name: String,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(owner_id: OwnerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            owner_id,
            name: name.into(),
            last_activity_at: now,
            created_at: now,
        }
    }

    pub fn has_default_name(&self) -> bool {
        self.name == DEFAULT_CONVERSATION_NAME
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub entity_type: EntityType,
    pub source_id: String,
    pub similarity: f32,
}

impl From<&RetrievedItem> for SourceRef {
    fn from(item: &RetrievedItem) -> Self {
        Self {
            entity_type: item.entity_type,
            source_id: item.source_id.clone(),
            similarity: item.similarity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub success: bool,
}

/// Structured context attached to a message, stored as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContext {
    Turn { sources: Vec<SourceRef>, tools: Vec<ToolUsage> },
    TaskCompletion { task_id: TaskId, event_id: String, automated: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub owner_id: OwnerId,
    pub role: MessageRole,
    pub content: String,
    pub context: Option<MessageContext>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        owner_id: OwnerId,
        role: MessageRole,
        content: impl Into<String>,
        context: Option<MessageContext>,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id,
            owner_id,
            role,
            content: content.into(),
            context,
            created_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match &self.context {
            Some(MessageContext::TaskCompletion { task_id, .. }) => Some(task_id),
            _ => None,
        }
    }
}
