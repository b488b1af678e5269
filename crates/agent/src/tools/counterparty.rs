use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use aide_core::domain::record::ContactRecord;
use aide_db::repositories::RecordRepository;

use crate::capabilities::{Crm, CrmContact, NewCrmContact};

use super::{optional_limit, optional_str, required_str, Tool, ToolContext, ToolError, ToolKind};

pub struct SearchCounterpartyTool {
    crm: Arc<dyn Crm>,
}

impl SearchCounterpartyTool {
    pub fn new(crm: Arc<dyn Crm>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl Tool for SearchCounterpartyTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SearchCounterparty
    }

    fn description(&self) -> &'static str {
        "Search for contacts in the CRM by name, email, company, or other properties."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Name, email, company, or other contact property"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of contacts to return (default: 5)"
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
        let contacts = self.crm.search(&context.owner, query, limit).await?;
        let results: Vec<Value> = contacts.iter().map(contact_json).collect();

        Ok(json!({ "count": results.len(), "results": results }))
    }
}

pub struct CreateCounterpartyTool {
    crm: Arc<dyn Crm>,
    records: Arc<dyn RecordRepository>,
}

impl CreateCounterpartyTool {
    pub fn new(crm: Arc<dyn Crm>, records: Arc<dyn RecordRepository>) -> Self {
        Self { crm, records }
    }
}

#[async_trait]
impl Tool for CreateCounterpartyTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CreateCounterparty
    }

    fn description(&self) -> &'static str {
        "Create a new contact in the CRM. Requires at least an email address or a name."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "description": "Contact's email address" },
                "firstname": { "type": "string", "description": "Contact's first name" },
                "lastname": { "type": "string", "description": "Contact's last name" },
                "company": { "type": "string", "description": "Contact's company name" },
                "jobtitle": { "type": "string", "description": "Contact's job title" },
                "phone": { "type": "string", "description": "Contact's phone number" }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let field = |key: &str| optional_str(arguments, key).map(str::to_string);
        let new_contact = NewCrmContact {
            email: field("email").map(|email| email.to_lowercase()),
            firstname: field("firstname"),
            lastname: field("lastname"),
            company: field("company"),
            jobtitle: field("jobtitle"),
            phone: field("phone"),
        };
        if new_contact.email.is_none() && new_contact.full_name().is_none() {
            return Err(ToolError::InvalidArguments(
                "Either an email address or a name is required".to_string(),
            ));
        }

        let created = self.crm.create(&context.owner, &new_contact).await?;

        let local = ContactRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: context.owner.id.clone(),
            crm_id: Some(created.id.clone()),
            address: created.email.clone().or_else(|| new_contact.email.clone()),
            name: created.name.clone().or_else(|| new_contact.full_name()),
            properties: new_contact.properties(),
            created_at: Utc::now(),
        };
        if let Err(error) = self.records.save_contact(local).await {
            warn!(
                event_name = "tool.create_counterparty.mirror_failed",
                owner_id = %context.owner.id,
                crm_id = %created.id,
                error = %error,
                "contact created in CRM but not mirrored locally"
            );
        }

        Ok(json!({
            "contact": contact_json(&created),
            "message": format!(
                "Created contact {}",
                created.name.as_deref().or(created.email.as_deref()).unwrap_or(&created.id)
            ),
        }))
    }
}

fn contact_json(contact: &CrmContact) -> Value {
    let property = |key: &str| contact.properties.get(key).cloned().unwrap_or(Value::Null);
    json!({
        "id": contact.id,
        "name": contact.name,
        "email": contact.email,
        "company": property("company"),
        "jobtitle": property("jobtitle"),
        "phone": property("phone"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use aide_core::domain::owner::Owner;
    use aide_db::repositories::{InMemoryRecordRepository, RecordRepository};

    use super::{CreateCounterpartyTool, SearchCounterpartyTool};
    use crate::test_support::{crm_contact, FakeCrm};
    use crate::tools::{ToolContext, ToolRegistry};

    fn context() -> ToolContext {
        ToolContext { owner: Owner::new("owner-1", "owner@corp.com"), conversation_id: None }
    }

    #[tokio::test]
    async fn search_returns_crm_matches() {
        let crm = Arc::new(FakeCrm {
            directory: vec![
                crm_contact("1", "Jane Doe", "jane@acme.com"),
                crm_contact("2", "Bob Roe", "bob@acme.com"),
            ],
            ..FakeCrm::default()
        });
        let mut registry = ToolRegistry::default();
        registry.register(SearchCounterpartyTool::new(crm));

        let invocation = registry.execute("search_counterparty", r#"{"query":"jane"}"#, &context()).await;

        assert!(invocation.success);
        assert_eq!(invocation.result["count"], json!(1));
        assert_eq!(invocation.result["results"][0]["email"], json!("jane@acme.com"));
    }

    #[tokio::test]
    async fn create_mirrors_into_local_contacts() {
        let crm = Arc::new(FakeCrm::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let mut registry = ToolRegistry::default();
        registry.register(CreateCounterpartyTool::new(crm.clone(), records.clone()));

        let invocation = registry
            .execute(
                "create_counterparty",
                r#"{"email":"Jane@Acme.com","firstname":"Jane","lastname":"Doe","company":"Acme"}"#,
                &context(),
            )
            .await;

        assert!(invocation.success);
        assert_eq!(invocation.result["message"], json!("Created contact Jane Doe"));
        let mirrored = records
            .find_contact_by_address(&context().owner.id, "jane@acme.com")
            .await
            .expect("lookup")
            .expect("mirrored contact");
        assert_eq!(mirrored.crm_id.as_deref(), Some("crm-1"));
        assert_eq!(mirrored.property("company"), Some("Acme"));
    }

    #[tokio::test]
    async fn create_requires_email_or_name() {
        let crm = Arc::new(FakeCrm::default());
        let mut registry = ToolRegistry::default();
        registry.register(CreateCounterpartyTool::new(
            crm.clone(),
            Arc::new(InMemoryRecordRepository::default()),
        ));

        let invocation =
            registry.execute("create_counterparty", r#"{"company":"Acme"}"#, &context()).await;

        assert!(!invocation.success);
        assert!(crm.created.lock().expect("created lock").is_empty());
    }
}
