use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use aide_core::domain::conversation::{Conversation, ConversationId, Message};
use aide_core::domain::owner::{Owner, OwnerId};
use aide_core::domain::record::{ContactRecord, EmailRecord, NoteRecord};
use aide_core::domain::retrieval::EntityType;
use aide_core::domain::task::{Task, TaskId, TaskStatistics, TaskStatus};

pub mod conversation;
pub mod memory;
pub mod owner;
pub mod record;
pub mod task;

pub(crate) mod decode;

pub use conversation::{SqlConversationRepository, SqlMessageRepository};
pub use memory::{
    InMemoryConversationRepository, InMemoryMessageRepository, InMemoryOwnerRepository,
    InMemoryRecordRepository, InMemoryTaskRepository,
};
pub use owner::SqlOwnerRepository;
pub use record::SqlRecordRepository;
pub use task::SqlTaskRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait OwnerRepository: Send + Sync {
    async fn find(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError>;
    async fn save(&self, owner: Owner) -> Result<(), RepositoryError>;
    /// Owners holding a mailbox credential, in stable id order.
    async fn list_with_mailbox(&self) -> Result<Vec<Owner>, RepositoryError>;
    /// Owners holding any credential, in stable id order.
    async fn list_connected(&self) -> Result<Vec<Owner>, RepositoryError>;
    async fn mark_checked(&self, id: &OwnerId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    /// Most recently active first.
    async fn list_for_owner(&self, owner_id: &OwnerId)
        -> Result<Vec<Conversation>, RepositoryError>;
    async fn find_by_name(
        &self,
        owner_id: &OwnerId,
        name: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
    /// Removes the conversation with its messages and tasks.
    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;
    /// Chronological. With a limit, only the most recent `limit` messages.
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn count_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;
    async fn save(&self, task: Task) -> Result<(), RepositoryError>;
    /// Newest first.
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Task>, RepositoryError>;
    /// Newest first.
    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, RepositoryError>;
    /// Waiting tasks of `owner_id` expecting `counterparty`, compared
    /// case-insensitively. Oldest first.
    async fn list_waiting_for_counterparty(
        &self,
        owner_id: &OwnerId,
        counterparty: &str,
    ) -> Result<Vec<Task>, RepositoryError>;
    async fn statistics(&self, owner_id: &OwnerId) -> Result<TaskStatistics, RepositoryError>;
}

/// A stored record whose embedding has not been computed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingCandidate {
    pub entity_type: EntityType,
    pub id: String,
    pub owner_id: OwnerId,
    pub text: String,
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn save_email(&self, email: EmailRecord) -> Result<(), RepositoryError>;
    async fn find_email(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<EmailRecord>, RepositoryError>;
    /// Keyword match over subject, sender and body. Newest first.
    async fn search_emails(
        &self,
        owner_id: &OwnerId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, RepositoryError>;

    async fn save_contact(&self, contact: ContactRecord) -> Result<(), RepositoryError>;
    async fn find_contact(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError>;
    async fn find_contact_by_address(
        &self,
        owner_id: &OwnerId,
        address: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError>;

    async fn save_note(&self, note: NoteRecord) -> Result<(), RepositoryError>;
    async fn find_note(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<NoteRecord>, RepositoryError>;

    async fn list_missing_embeddings(
        &self,
        entity_type: EntityType,
        owner_id: Option<&OwnerId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingCandidate>, RepositoryError>;
    async fn set_embedding(
        &self,
        entity_type: EntityType,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), RepositoryError>;
}
