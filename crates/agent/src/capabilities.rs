//! External capabilities the agent consumes: the owner's mailbox and CRM.
//!
//! Implementations receive the full [`Owner`] so they can read the credential
//! they need. A missing credential is reported as
//! [`CapabilityError::NotConnected`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::Owner;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("{0} is not connected for this account")]
    NotConnected(&'static str),
    #[error("{service} request failed: {message}")]
    Upstream { service: &'static str, message: String },
    #[error("{service} response could not be decoded: {message}")]
    Decode { service: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub thread_id: Option<String>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Inbound messages received after `since`, oldest first, at most `limit`.
    async fn fetch_events_since(
        &self,
        owner: &Owner,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, CapabilityError>;

    async fn send(
        &self,
        owner: &Owner,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrmContact {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub properties: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmNote {
    pub id: String,
    pub body: String,
    /// First associated CRM contact.
    pub contact_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCrmContact {
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub company: Option<String>,
    pub jobtitle: Option<String>,
    pub phone: Option<String>,
}

impl NewCrmContact {
    pub fn full_name(&self) -> Option<String> {
        let name = [self.firstname.as_deref(), self.lastname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Non-empty fields as CRM property pairs.
    pub fn properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        for (key, value) in [
            ("email", &self.email),
            ("firstname", &self.firstname),
            ("lastname", &self.lastname),
            ("company", &self.company),
            ("jobtitle", &self.jobtitle),
            ("phone", &self.phone),
        ] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
                properties.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        properties
    }
}

#[async_trait]
pub trait Crm: Send + Sync {
    async fn search(
        &self,
        owner: &Owner,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CrmContact>, CapabilityError>;

    async fn create(
        &self,
        owner: &Owner,
        contact: &NewCrmContact,
    ) -> Result<CrmContact, CapabilityError>;

    /// Attaches a note to a CRM contact and returns the note id.
    async fn create_note(
        &self,
        owner: &Owner,
        contact_id: &str,
        body: &str,
    ) -> Result<String, CapabilityError>;

    /// Every contact in the owner's CRM, across all pages.
    async fn list_contacts(&self, owner: &Owner) -> Result<Vec<CrmContact>, CapabilityError>;

    async fn list_notes(&self, owner: &Owner) -> Result<Vec<CrmNote>, CapabilityError>;
}

/// Mailbox used when no mail provider is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledMailbox;

#[async_trait]
impl Mailbox for DisabledMailbox {
    async fn fetch_events_since(
        &self,
        _owner: &Owner,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<InboundEvent>, CapabilityError> {
        Err(CapabilityError::NotConnected("mailbox"))
    }

    async fn send(
        &self,
        _owner: &Owner,
        _message: &OutgoingMessage,
    ) -> Result<SentMessage, CapabilityError> {
        Err(CapabilityError::NotConnected("mailbox"))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledCrm;

#[async_trait]
impl Crm for DisabledCrm {
    async fn search(
        &self,
        _owner: &Owner,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<CrmContact>, CapabilityError> {
        Err(CapabilityError::NotConnected("CRM"))
    }

    async fn create(
        &self,
        _owner: &Owner,
        _contact: &NewCrmContact,
    ) -> Result<CrmContact, CapabilityError> {
        Err(CapabilityError::NotConnected("CRM"))
    }

    async fn create_note(
        &self,
        _owner: &Owner,
        _contact_id: &str,
        _body: &str,
    ) -> Result<String, CapabilityError> {
        Err(CapabilityError::NotConnected("CRM"))
    }

    async fn list_contacts(&self, _owner: &Owner) -> Result<Vec<CrmContact>, CapabilityError> {
        Err(CapabilityError::NotConnected("CRM"))
    }

    async fn list_notes(&self, _owner: &Owner) -> Result<Vec<CrmNote>, CapabilityError> {
        Err(CapabilityError::NotConnected("CRM"))
    }
}
