use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Map;

use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::Owner;
use aide_core::retrieval::{Embedder, EmbeddingError};

use crate::capabilities::{
    CapabilityError, Crm, CrmContact, CrmNote, Mailbox, NewCrmContact, OutgoingMessage,
    SentMessage,
};
use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, ToolCallRequest};

/// Replays canned completions in order and records every request.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<Completion, LlmError>>) -> Self {
        Self { script: Mutex::new(script.into()), requests: Mutex::new(Vec::new()) }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest { id: id.to_string(), name: name.to_string(), arguments: arguments.to_string() }
}

/// Every text embeds to the same unit vector.
pub struct ConstantEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct RecordingMailbox {
    pub inbox: Mutex<Vec<InboundEvent>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub fetches: Mutex<Vec<DateTime<Utc>>>,
    pub fail_fetch: bool,
    /// Fetches for this owner id fail; other owners are served.
    pub fail_owner: Option<String>,
}

#[async_trait]
impl Mailbox for RecordingMailbox {
    async fn fetch_events_since(
        &self,
        owner: &Owner,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, CapabilityError> {
        self.fetches.lock().expect("fetches lock").push(since);
        if self.fail_fetch || self.fail_owner.as_deref() == Some(owner.id.0.as_str()) {
            return Err(CapabilityError::Upstream {
                service: "mailbox",
                message: "connection reset".to_string(),
            });
        }
        let inbox = self.inbox.lock().expect("inbox lock");
        Ok(inbox.iter().filter(|event| event.received_at > since).take(limit).cloned().collect())
    }

    async fn send(
        &self,
        _owner: &Owner,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, CapabilityError> {
        let mut sent = self.sent.lock().expect("sent lock");
        sent.push(message.clone());
        Ok(SentMessage { id: format!("msg-{}", sent.len()), thread_id: None })
    }
}

#[derive(Default)]
pub struct FakeCrm {
    pub created: Mutex<Vec<NewCrmContact>>,
    pub notes: Mutex<Vec<(String, String)>>,
    pub directory: Vec<CrmContact>,
    pub remote_notes: Vec<CrmNote>,
    pub fail_listing: bool,
}

#[async_trait]
impl Crm for FakeCrm {
    async fn search(
        &self,
        _owner: &Owner,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CrmContact>, CapabilityError> {
        let query = query.to_lowercase();
        Ok(self
            .directory
            .iter()
            .filter(|contact| {
                contact.name.as_deref().unwrap_or_default().to_lowercase().contains(&query)
                    || contact.email.as_deref().unwrap_or_default().to_lowercase().contains(&query)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        _owner: &Owner,
        contact: &NewCrmContact,
    ) -> Result<CrmContact, CapabilityError> {
        let mut created = self.created.lock().expect("created lock");
        created.push(contact.clone());
        Ok(CrmContact {
            id: format!("crm-{}", created.len()),
            email: contact.email.clone(),
            name: contact.full_name(),
            properties: contact.properties(),
        })
    }

    async fn create_note(
        &self,
        _owner: &Owner,
        contact_id: &str,
        body: &str,
    ) -> Result<String, CapabilityError> {
        let mut notes = self.notes.lock().expect("notes lock");
        notes.push((contact_id.to_string(), body.to_string()));
        Ok(format!("note-{}", notes.len()))
    }

    async fn list_contacts(&self, _owner: &Owner) -> Result<Vec<CrmContact>, CapabilityError> {
        if self.fail_listing {
            return Err(CapabilityError::Upstream { service: "CRM", message: "rate limited".to_string() });
        }
        Ok(self.directory.clone())
    }

    async fn list_notes(&self, _owner: &Owner) -> Result<Vec<CrmNote>, CapabilityError> {
        if self.fail_listing {
            return Err(CapabilityError::Upstream { service: "CRM", message: "rate limited".to_string() });
        }
        Ok(self.remote_notes.clone())
    }
}

pub fn crm_contact(id: &str, name: &str, email: &str) -> CrmContact {
    CrmContact {
        id: id.to_string(),
        email: Some(email.to_string()),
        name: Some(name.to_string()),
        properties: Map::new(),
    }
}
