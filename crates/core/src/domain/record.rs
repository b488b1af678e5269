use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::owner::OwnerId;

/// An email synced from the owner's mailbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub owner_id: OwnerId,
    pub external_id: String,
    pub subject: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub body: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EmailRecord {
    pub fn sender_display(&self) -> &str {
        match self.from_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.from_address,
        }
    }

    pub fn embedding_text(&self) -> String {
        format!("Subject: {}\n\n{}", self.subject, self.body)
    }
}

/// A local mirror of a CRM contact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub owner_id: OwnerId,
    pub crm_id: Option<String>,
    pub address: Option<String>,
    pub name: Option<String>,
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ContactRecord {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
    }

    pub fn embedding_text(&self) -> String {
        let location = ["city", "state", "country"]
            .iter()
            .filter_map(|key| self.property(key))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Name: {}\nEmail: {}\nPhone: {}\nCompany: {}\nJob Title: {}\nLocation: {}",
            self.name.as_deref().unwrap_or_default(),
            self.address.as_deref().unwrap_or_default(),
            self.property("phone").unwrap_or_default(),
            self.property("company").unwrap_or_default(),
            self.property("jobtitle").unwrap_or_default(),
            location,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    pub owner_id: OwnerId,
    pub crm_id: Option<String>,
    pub contact_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use super::ContactRecord;
    use crate::domain::owner::OwnerId;

    #[test]
    fn contact_embedding_text_includes_known_properties() {
        let mut properties = Map::new();
        properties.insert("company".to_string(), json!("Acme"));
        properties.insert("city".to_string(), json!("Berlin"));
        properties.insert("country".to_string(), json!("DE"));
        let contact = ContactRecord {
            id: "c-1".to_string(),
            owner_id: OwnerId("owner-1".to_string()),
            crm_id: None,
            address: Some("jane@acme.com".to_string()),
            name: Some("Jane Doe".to_string()),
            properties,
            created_at: Utc::now(),
        };

        let text = contact.embedding_text();
        assert!(text.contains("Name: Jane Doe"));
        assert!(text.contains("Company: Acme"));
        assert!(text.contains("Location: Berlin, DE"));
        assert_eq!(contact.property("phone"), None);
    }
}
