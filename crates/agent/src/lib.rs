//! Agent layer of the assistant.
//!
//! Each conversational turn is grounded with semantic retrieval and answered
//! by a language model that may call a closed catalog of tools for a bounded
//! number of rounds. Waiting tasks link outbound mail to later replies: the
//! ingestion loop sweeps mailboxes, matches replies to tasks and posts a
//! notification back into the originating conversation. A separate sync job
//! imports CRM records and keeps embeddings current.
//!
//! # Key Types
//!
//! - `AgentRuntime` - per-turn orchestrator (see `runtime`)
//! - `ToolRegistry` - tool schemas and the never-failing executor
//! - `TaskCorrelationEngine` - waiting task registry and completion
//! - `IngestionLoop` - reentrancy-guarded mailbox sweep
//! - `SyncJob` - CRM import plus embedding backfill per owner
//! - `LlmClient`, `Mailbox`, `Crm` - injected capability seams

pub mod capabilities;
pub mod conversation;
pub mod correlation;
pub mod enrichment;
pub mod indexing;
pub mod ingestion;
pub mod llm;
pub mod runtime;
pub mod sync;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use conversation::ConversationService;
pub use correlation::TaskCorrelationEngine;
pub use ingestion::{CycleReport, IngestionLoop, IngestionSettings};
pub use runtime::{AgentRuntime, RuntimeSettings, TurnError, TurnOutcome};
pub use sync::{SyncJob, SyncReport, SyncSettings};
pub use tools::{ToolDependencies, ToolRegistry};
