//! Contact auto-creation for unknown senders seen during ingestion.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::Owner;
use aide_core::domain::record::{ContactRecord, NoteRecord};
use aide_db::repositories::{RecordRepository, RepositoryError};

use crate::capabilities::{Crm, NewCrmContact};
use crate::llm::LlmClient;

const EXTRACTION_BODY_CHARS: usize = 2000;
const EXTRACTION_TEMPERATURE: f32 = 0.3;

/// Fields pulled out of an email, by the model or by the fallback.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtractedContact {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub company: Option<String>,
    pub jobtitle: Option<String>,
    pub phone: Option<String>,
    pub note: Option<String>,
}

pub struct ContactEnricher {
    records: Arc<dyn RecordRepository>,
    crm: Arc<dyn Crm>,
    llm: Arc<dyn LlmClient>,
}

impl ContactEnricher {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        crm: Arc<dyn Crm>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self { records, crm, llm }
    }

    /// Creates a local contact (and a CRM one when connected) for an unknown
    /// sender. Returns `false` when the sender is already known.
    pub async fn ensure_contact(
        &self,
        owner: &Owner,
        event: &InboundEvent,
    ) -> Result<bool, RepositoryError> {
        let address = event.sender_key();
        if address.is_empty()
            || self.records.find_contact_by_address(&owner.id, &address).await?.is_some()
        {
            return Ok(false);
        }

        let extracted = self.extract(event).await;
        let new_contact = NewCrmContact {
            email: Some(address.clone()),
            firstname: extracted.firstname.clone(),
            lastname: extracted.lastname.clone(),
            company: extracted.company.clone(),
            jobtitle: extracted.jobtitle.clone(),
            phone: extracted.phone.clone(),
        };
        let note_body = extracted.note.clone().unwrap_or_else(|| default_note(event));

        let mut crm_id = None;
        let mut crm_note_id = None;
        if owner.credentials.has_crm() {
            match self.crm.create(owner, &new_contact).await {
                Ok(created) => {
                    match self.crm.create_note(owner, &created.id, &note_body).await {
                        Ok(note_id) => crm_note_id = Some(note_id),
                        Err(error) => warn!(
                            event_name = "contact.enrich.crm_note_failed",
                            owner_id = %owner.id,
                            crm_id = %created.id,
                            error = %error,
                            "CRM note not created"
                        ),
                    }
                    crm_id = Some(created.id);
                }
                Err(error) => warn!(
                    event_name = "contact.enrich.crm_failed",
                    owner_id = %owner.id,
                    error = %error,
                    "CRM contact not created; keeping local copy only"
                ),
            }
        }

        let now = Utc::now();
        let contact = ContactRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            crm_id,
            address: Some(address),
            name: new_contact.full_name(),
            properties: new_contact.properties(),
            created_at: now,
        };
        let contact_id = contact.id.clone();
        self.records.save_contact(contact).await?;
        self.records
            .save_note(NoteRecord {
                id: Uuid::new_v4().to_string(),
                owner_id: owner.id.clone(),
                crm_id: crm_note_id,
                contact_id: Some(contact_id.clone()),
                body: note_body,
                created_at: now,
            })
            .await?;

        info!(
            event_name = "contact.enrich.created",
            owner_id = %owner.id,
            contact_id = %contact_id,
            "contact created for new sender"
        );
        Ok(true)
    }

    async fn extract(&self, event: &InboundEvent) -> ExtractedContact {
        let body: String = event.body.chars().take(EXTRACTION_BODY_CHARS).collect();
        let prompt = format!(
            "Extract contact information from this email. Return ONLY a JSON object with these \
             fields (use null for unknown values):\n\
             {{\"firstname\": string, \"lastname\": string, \"company\": string, \
             \"jobtitle\": string, \"phone\": string, \"note\": string}}\n\
             The note should be one or two sentences describing who this person is and what \
             they reached out about.\n\n\
             From: {} <{}>\nSubject: {}\n\n{}",
            event.sender_name.as_deref().unwrap_or_default(),
            event.sender,
            event.subject,
            body
        );

        match self.llm.generate(&prompt, EXTRACTION_TEMPERATURE).await {
            Ok(text) => parse_extraction(&text).unwrap_or_else(|| fallback_extraction(event)),
            Err(error) => {
                warn!(
                    event_name = "contact.enrich.extract_failed",
                    sender = %event.sender_key(),
                    error = %error,
                    "contact extraction fell back to display name"
                );
                fallback_extraction(event)
            }
        }
    }
}

/// Parses the first `{...}` span in the model text.
pub fn parse_extraction(text: &str) -> Option<ExtractedContact> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let mut extracted: ExtractedContact = serde_json::from_str(&text[start..=end]).ok()?;
    for field in [
        &mut extracted.firstname,
        &mut extracted.lastname,
        &mut extracted.company,
        &mut extracted.jobtitle,
        &mut extracted.phone,
        &mut extracted.note,
    ] {
        *field = field.take().map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
    }
    Some(extracted)
}

/// Splits the display name into first and last name.
pub fn fallback_extraction(event: &InboundEvent) -> ExtractedContact {
    let name = event.sender_name.as_deref().map(str::trim).unwrap_or_default();
    let mut parts = name.split_whitespace();
    let firstname = parts.next().map(str::to_string);
    let rest = parts.collect::<Vec<_>>().join(" ");
    ExtractedContact {
        firstname,
        lastname: if rest.is_empty() { None } else { Some(rest) },
        note: Some(default_note(event)),
        ..ExtractedContact::default()
    }
}

fn default_note(event: &InboundEvent) -> String {
    format!("{} reached out regarding: {}", event.display_sender(), event.subject)
}
