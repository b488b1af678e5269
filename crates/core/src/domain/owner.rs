use chrono::{DateTime, Utc};
use secrecy::SecretString;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OwnerId(pub String);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque per-owner credential handles for the external mailbox and CRM.
///
/// Values are never logged; `Debug` output is redacted by `SecretString`.
#[derive(Clone, Debug, Default)]
pub struct OwnerCredentials {
    pub mailbox_token: Option<SecretString>,
    pub crm_token: Option<SecretString>,
}

impl OwnerCredentials {
    pub fn has_mailbox(&self) -> bool {
        self.mailbox_token.is_some()
    }

    pub fn has_crm(&self) -> bool {
        self.crm_token.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct Owner {
    pub id: OwnerId,
    pub address: String,
    pub credentials: OwnerCredentials,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Owner {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: OwnerId(id.into()),
            address: address.into(),
            credentials: OwnerCredentials::default(),
            last_checked_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_credentials(mut self, credentials: OwnerCredentials) -> Self {
        self.credentials = credentials;
        self
    }
}
