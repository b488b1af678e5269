//! HTTP adapters for the capability seams of `aide-agent`.
//!
//! - `OpenAiChatClient` / `OpenAiEmbedder` - OpenAI-compatible chat and
//!   embedding endpoints (OpenAI, Ollama and other compatible servers)
//! - `HubSpotCrm` - contact search, creation and notes
//! - `GmailMailbox` - inbound sweep and outbound send
//! - `Services` - everything above wired to the sqlite repositories
//!
//! Every client carries the timeout from its config section. A timeout is
//! reported like any other transport failure and never retried here.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

pub mod assembly;
pub mod embedding;
pub mod gmail;
pub mod hubspot;
pub mod openai;

pub use assembly::{AssemblyError, Services};
pub use embedding::OpenAiEmbedder;
pub use gmail::GmailMailbox;
pub use hubspot::HubSpotCrm;
pub use openai::OpenAiChatClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client, ProviderError> {
    Ok(Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?)
}

/// Response body trimmed for error messages.
pub(crate) fn excerpt(body: &str) -> String {
    const LIMIT: usize = 300;
    let mut text: String = body.chars().take(LIMIT).collect();
    if body.chars().count() > LIMIT {
        text.push_str("...");
    }
    text
}
