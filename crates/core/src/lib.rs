pub mod config;
pub mod domain;
pub mod errors;
pub mod retrieval;
pub mod tasks;

pub use domain::conversation::{
    Conversation, ConversationId, Message, MessageContext, MessageId, MessageRole, SourceRef,
    ToolUsage, DEFAULT_CONVERSATION_NAME,
};
pub use domain::event::InboundEvent;
pub use domain::owner::{Owner, OwnerCredentials, OwnerId};
pub use domain::record::{ContactRecord, EmailRecord, NoteRecord};
pub use domain::retrieval::{EntityType, RetrievedItem};
pub use domain::task::{Task, TaskId, TaskStatistics, TaskStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use retrieval::{
    format_context, Embedder, EmbeddingError, RetrievalEngine, RetrievalError, SearchOptions,
    VectorStore, VectorStoreError,
};
pub use tasks::{CompletionOutcome, NewTask, TaskError, TaskLifecycle};
