use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Email,
    Contact,
    Note,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [Self::Email, Self::Contact, Self::Note];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Contact => "contact",
            Self::Note => "note",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" | "emails" => Some(Self::Email),
            "contact" | "contacts" => Some(Self::Contact),
            "note" | "notes" => Some(Self::Note),
            _ => None,
        }
    }
}

/// A single ranked hit from the retrieval engine. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub entity_type: EntityType,
    pub source_id: String,
    pub similarity: f32,
    /// Headline shown before the body, e.g. `Email from x (date)`.
    pub snippet: String,
    pub body: String,
}
