use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use aide_core::domain::retrieval::EntityType;
use aide_db::repositories::RecordRepository;

use super::{optional_limit, optional_str, required_str, Tool, ToolContext, ToolError, ToolKind};

const PREVIEW_CHARS: usize = 200;

pub struct SearchRecordsTool {
    records: Arc<dyn RecordRepository>,
}

impl SearchRecordsTool {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for SearchRecordsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SearchRecords
    }

    fn description(&self) -> &'static str {
        "Search stored emails by sender name, email address, subject keywords, or body content. \
         Returns matching emails with their details."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Sender name, email address, subject keywords, or body content"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of emails to return (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let limit = optional_limit(arguments, "limit", 5, 25);
        let emails = self.records.search_emails(&context.owner.id, query, limit).await?;

        let results: Vec<Value> = emails
            .iter()
            .map(|email| {
                json!({
                    "id": email.id,
                    "subject": email.subject,
                    "from": email.sender_display(),
                    "from_address": email.from_address,
                    "date": email.sent_at.unwrap_or(email.created_at).to_rfc3339(),
                    "preview": email.body.chars().take(PREVIEW_CHARS).collect::<String>(),
                })
            })
            .collect();

        Ok(json!({ "count": results.len(), "results": results }))
    }
}

pub struct ReadRecordTool {
    records: Arc<dyn RecordRepository>,
}

impl ReadRecordTool {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for ReadRecordTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ReadRecord
    }

    fn description(&self) -> &'static str {
        "Read the full content of a stored email, contact, or note by its id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "The id of the record to read" },
                "record_type": {
                    "type": "string",
                    "enum": ["email", "contact", "note"],
                    "description": "Kind of record (default: email)"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let id = match arguments.get("id") {
            Some(Value::Number(number)) => number.to_string(),
            _ => required_str(arguments, "id")?.to_string(),
        };
        let entity_type = match optional_str(arguments, "record_type") {
            None => EntityType::Email,
            Some(raw) => EntityType::parse(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!("Unsupported record_type `{raw}`"))
            })?,
        };
        let owner_id = &context.owner.id;

        match entity_type {
            EntityType::Email => {
                let email = self
                    .records
                    .find_email(owner_id, &id)
                    .await?
                    .ok_or(ToolError::NotFound("Email"))?;
                Ok(json!({
                    "record_type": "email",
                    "email": {
                        "id": email.id,
                        "subject": email.subject,
                        "from": email.sender_display(),
                        "from_address": email.from_address,
                        "to": email.to_addresses,
                        "date": email.sent_at.unwrap_or(email.created_at).to_rfc3339(),
                        "body": email.body,
                    }
                }))
            }
            EntityType::Contact => {
                let contact = self
                    .records
                    .find_contact(owner_id, &id)
                    .await?
                    .ok_or(ToolError::NotFound("Contact"))?;
                Ok(json!({
                    "record_type": "contact",
                    "contact": {
                        "id": contact.id,
                        "crm_id": contact.crm_id,
                        "name": contact.name,
                        "email": contact.address,
                        "properties": contact.properties,
                    }
                }))
            }
            EntityType::Note => {
                let note = self
                    .records
                    .find_note(owner_id, &id)
                    .await?
                    .ok_or(ToolError::NotFound("Note"))?;
                Ok(json!({
                    "record_type": "note",
                    "note": {
                        "id": note.id,
                        "contact_id": note.contact_id,
                        "body": note.body,
                        "created_at": note.created_at.to_rfc3339(),
                    }
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Value};

    use aide_core::domain::owner::{Owner, OwnerId};
    use aide_core::domain::record::EmailRecord;
    use aide_db::repositories::{InMemoryRecordRepository, RecordRepository};

    use super::{ReadRecordTool, SearchRecordsTool};
    use crate::tools::{ToolContext, ToolRegistry};

    async fn registry() -> ToolRegistry {
        let records = Arc::new(InMemoryRecordRepository::default());
        for (id, owner, subject) in [
            ("e1", "owner-1", "Quarterly report"),
            ("e2", "owner-2", "Quarterly report for someone else"),
        ] {
            records
                .save_email(EmailRecord {
                    id: id.to_string(),
                    owner_id: OwnerId(owner.to_string()),
                    external_id: format!("ext-{id}"),
                    subject: subject.to_string(),
                    from_address: "jane@acme.com".to_string(),
                    from_name: Some("Jane Doe".to_string()),
                    to_addresses: vec!["owner@corp.com".to_string()],
                    body: "Numbers attached.".to_string(),
                    sent_at: None,
                    created_at: Utc::now(),
                })
                .await
                .expect("save email");
        }

        let mut registry = ToolRegistry::default();
        registry.register(SearchRecordsTool::new(records.clone()));
        registry.register(ReadRecordTool::new(records));
        registry
    }

    fn context() -> ToolContext {
        ToolContext { owner: Owner::new("owner-1", "owner@corp.com"), conversation_id: None }
    }

    #[tokio::test]
    async fn search_only_sees_own_records() {
        let registry = registry().await;
        let invocation =
            registry.execute("search_records", r#"{"query":"quarterly"}"#, &context()).await;

        assert!(invocation.success);
        assert_eq!(invocation.result["count"], json!(1));
        assert_eq!(invocation.result["results"][0]["from"], json!("Jane Doe"));
    }

    #[tokio::test]
    async fn read_returns_full_body_or_not_found() {
        let registry = registry().await;

        let found = registry.execute("read_record", r#"{"id":"e1"}"#, &context()).await;
        assert!(found.success);
        assert_eq!(found.result["email"]["body"], json!("Numbers attached."));

        let foreign = registry.execute("read_record", r#"{"id":"e2"}"#, &context()).await;
        assert!(!foreign.success);
        assert_eq!(foreign.result["error"], Value::String("Email not found".to_string()));

        let bad_type = registry
            .execute("read_record", r#"{"id":"e1","record_type":"invoice"}"#, &context())
            .await;
        assert!(!bad_type.success);
    }
}
