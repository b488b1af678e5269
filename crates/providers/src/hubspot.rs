use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use aide_agent::capabilities::{CapabilityError, Crm, CrmContact, CrmNote, NewCrmContact};
use aide_core::config::CrmConfig;
use aide_core::domain::owner::Owner;

use crate::{excerpt, http_client, ProviderError};

const SERVICE: &str = "CRM";
const CONTACT_PROPERTIES: [&str; 9] = [
    "email", "firstname", "lastname", "phone", "company", "jobtitle", "city", "state", "country",
];
const NOTE_PROPERTIES: [&str; 2] = ["hs_note_body", "hs_timestamp"];
/// HubSpot-defined association type for note -> contact.
const NOTE_TO_CONTACT: u32 = 202;
const PAGE_SIZE: &str = "100";
const MAX_PAGES: usize = 100;

/// HubSpot CRM v3 objects API, authenticated with the owner's CRM token.
pub struct HubSpotCrm {
    client: Client,
    base_url: String,
}

impl HubSpotCrm {
    pub fn new(config: &CrmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, owner: &Owner, builder: RequestBuilder) -> Result<RequestBuilder, CapabilityError> {
        let token = owner
            .credentials
            .crm_token
            .as_ref()
            .ok_or(CapabilityError::NotConnected(SERVICE))?;
        Ok(builder.bearer_auth(token.expose_secret()))
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, CapabilityError> {
        let response = builder.send().await.map_err(upstream)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Upstream {
                service: SERVICE,
                message: format!("HubSpot returned {status}: {}", excerpt(&body)),
            });
        }
        response
            .json()
            .await
            .map_err(|error| CapabilityError::Decode { service: SERVICE, message: error.to_string() })
    }

    /// Follows `paging.next.after` cursors over one object type.
    async fn list_objects(
        &self,
        owner: &Owner,
        object: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, CapabilityError> {
        let mut objects = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut builder = self
                .client
                .get(format!("{}/crm/v3/objects/{object}", self.base_url))
                .query(&[("limit", PAGE_SIZE)])
                .query(query);
            if let Some(cursor) = &after {
                builder = builder.query(&[("after", cursor.as_str())]);
            }
            let payload = self.send_json(self.authorized(owner, builder)?).await?;

            if let Some(results) = payload.get("results").and_then(Value::as_array) {
                objects.extend(results.iter().cloned());
            }
            after = payload.pointer("/paging/next/after").and_then(id_string);
            if after.is_none() {
                return Ok(objects);
            }
        }

        warn!(
            event_name = "crm.list.truncated",
            owner_id = %owner.id,
            object,
            fetched = objects.len(),
            "page limit reached; remaining objects not listed"
        );
        Ok(objects)
    }
}

#[async_trait]
impl Crm for HubSpotCrm {
    async fn search(
        &self,
        owner: &Owner,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CrmContact>, CapabilityError> {
        let body = json!({
            "query": query,
            "limit": limit.clamp(1, 100),
            "properties": CONTACT_PROPERTIES,
        });
        let builder = self
            .client
            .post(format!("{}/crm/v3/objects/contacts/search", self.base_url))
            .json(&body);
        let payload = self.send_json(self.authorized(owner, builder)?).await?;

        Ok(payload
            .get("results")
            .and_then(Value::as_array)
            .map(|results| results.iter().filter_map(parse_contact).collect())
            .unwrap_or_default())
    }

    async fn create(
        &self,
        owner: &Owner,
        contact: &NewCrmContact,
    ) -> Result<CrmContact, CapabilityError> {
        let builder = self
            .client
            .post(format!("{}/crm/v3/objects/contacts", self.base_url))
            .json(&json!({ "properties": contact.properties() }));
        let payload = self.send_json(self.authorized(owner, builder)?).await?;

        let created = parse_contact(&payload).ok_or_else(|| CapabilityError::Decode {
            service: SERVICE,
            message: "created contact has no id".to_string(),
        })?;
        info!(
            event_name = "crm.contact.created",
            owner_id = %owner.id,
            crm_id = %created.id,
            "HubSpot contact created"
        );
        Ok(created)
    }

    async fn create_note(
        &self,
        owner: &Owner,
        contact_id: &str,
        body: &str,
    ) -> Result<String, CapabilityError> {
        let request = json!({
            "properties": {
                "hs_note_body": body,
                "hs_timestamp": Utc::now().to_rfc3339(),
            },
            "associations": [{
                "to": { "id": contact_id },
                "types": [{
                    "associationCategory": "HUBSPOT_DEFINED",
                    "associationTypeId": NOTE_TO_CONTACT,
                }],
            }],
        });
        let builder =
            self.client.post(format!("{}/crm/v3/objects/notes", self.base_url)).json(&request);
        let payload = self.send_json(self.authorized(owner, builder)?).await?;

        payload.get("id").and_then(id_string).ok_or_else(|| CapabilityError::Decode {
            service: SERVICE,
            message: "created note has no id".to_string(),
        })
    }

    async fn list_contacts(&self, owner: &Owner) -> Result<Vec<CrmContact>, CapabilityError> {
        let query = [("properties", CONTACT_PROPERTIES.join(","))];
        let objects = self.list_objects(owner, "contacts", &query).await?;
        Ok(objects.iter().filter_map(parse_contact).collect())
    }

    async fn list_notes(&self, owner: &Owner) -> Result<Vec<CrmNote>, CapabilityError> {
        let query = [
            ("properties", NOTE_PROPERTIES.join(",")),
            ("associations", "contacts".to_string()),
        ];
        let objects = self.list_objects(owner, "notes", &query).await?;
        Ok(objects.iter().filter_map(parse_note).collect())
    }
}

fn upstream(error: reqwest::Error) -> CapabilityError {
    CapabilityError::Upstream { service: SERVICE, message: error.to_string() }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn parse_contact(value: &Value) -> Option<CrmContact> {
    let id = value.get("id").and_then(id_string)?;
    let properties: Map<String, Value> = value
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter(|(_, value)| value.as_str().is_some_and(|text| !text.is_empty()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let text = |key: &str| properties.get(key).and_then(Value::as_str).map(str::to_string);
    let name = [text("firstname"), text("lastname")].into_iter().flatten().collect::<Vec<_>>().join(" ");
    let email = text("email");

    Some(CrmContact {
        id,
        email,
        name: if name.is_empty() { None } else { Some(name) },
        properties,
    })
}

/// Notes without a body carry nothing to search and are dropped.
fn parse_note(value: &Value) -> Option<CrmNote> {
    let id = value.get("id").and_then(id_string)?;
    let property = |key: &str| value.pointer(&format!("/properties/{key}")).and_then(Value::as_str);
    let body = property("hs_note_body").map(str::trim).filter(|body| !body.is_empty())?;

    Some(CrmNote {
        id,
        body: body.to_string(),
        contact_id: value.pointer("/associations/contacts/results/0/id").and_then(id_string),
        timestamp: property("hs_timestamp")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use aide_agent::capabilities::{CapabilityError, Crm};
    use aide_core::config::AppConfig;
    use aide_core::domain::owner::Owner;

    use super::{parse_contact, parse_note, HubSpotCrm};

    #[test]
    fn parse_contact_builds_name_and_drops_blank_properties() {
        let contact = parse_contact(&json!({
            "id": "501",
            "properties": {
                "email": "jane@acme.com",
                "firstname": "Jane",
                "lastname": "Doe",
                "company": "",
                "jobtitle": null
            }
        }))
        .expect("contact");

        assert_eq!(contact.id, "501");
        assert_eq!(contact.name.as_deref(), Some("Jane Doe"));
        assert_eq!(contact.email.as_deref(), Some("jane@acme.com"));
        assert!(!contact.properties.contains_key("company"));
        assert!(!contact.properties.contains_key("jobtitle"));
        assert!(parse_contact(&json!({ "properties": {} })).is_none());
    }

    #[test]
    fn parse_note_reads_body_association_and_timestamp() {
        let note = parse_note(&json!({
            "id": 77,
            "properties": {
                "hs_note_body": " Met at the expo. ",
                "hs_timestamp": "2026-02-03T10:15:00.000Z"
            },
            "associations": { "contacts": { "results": [{ "id": "501", "type": "note_to_contact" }] } }
        }))
        .expect("note");

        assert_eq!(note.id, "77");
        assert_eq!(note.body, "Met at the expo.");
        assert_eq!(note.contact_id.as_deref(), Some("501"));
        assert_eq!(note.timestamp.map(|at| at.to_rfc3339()), Some("2026-02-03T10:15:00+00:00".to_string()));

        let orphan = parse_note(&json!({ "id": "78", "properties": { "hs_note_body": "Call back" } }))
            .expect("orphan note");
        assert_eq!(orphan.contact_id, None);
        assert!(parse_note(&json!({ "id": "79", "properties": { "hs_note_body": "" } })).is_none());
    }

    #[tokio::test]
    async fn listing_without_token_is_not_connected() {
        let crm = HubSpotCrm::new(&AppConfig::default().crm).expect("crm");
        let owner = Owner::new("owner-1", "owner@corp.com");

        let error = crm.list_contacts(&owner).await.expect_err("no token");

        assert_eq!(error, CapabilityError::NotConnected("CRM"));
    }

    #[tokio::test]
    async fn owner_without_token_is_not_connected() {
        let crm = HubSpotCrm::new(&AppConfig::default().crm).expect("crm");
        let owner = Owner::new("owner-1", "owner@corp.com");

        let error = crm.search(&owner, "jane", 5).await.expect_err("no token");

        assert_eq!(error, CapabilityError::NotConnected("CRM"));
    }
}
