use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound message pulled from an owner's mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub external_id: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Normalized sender address used for task matching.
    pub fn sender_key(&self) -> String {
        self.sender.trim().to_lowercase()
    }

    pub fn display_sender(&self) -> &str {
        match self.sender_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.sender,
        }
    }
}

/// Parses a `Name <address>` header into its parts.
pub fn parse_sender(raw: &str) -> (Option<String>, String) {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>')) {
        if open < close {
            let address = raw[open + 1..close].trim().to_string();
            let name = raw[..open].trim().trim_matches('"').trim();
            let name = if name.is_empty() { None } else { Some(name.to_string()) };
            return (name, address);
        }
    }
    (None, raw.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{parse_sender, InboundEvent};

    #[test]
    fn sender_key_is_trimmed_and_lowercased() {
        let event = InboundEvent {
            external_id: "evt-1".to_string(),
            sender: " Jane@ACME.com ".to_string(),
            sender_name: None,
            subject: "Report".to_string(),
            body: String::new(),
            received_at: Utc::now(),
        };

        assert_eq!(event.sender_key(), "jane@acme.com");
        assert_eq!(event.display_sender(), " Jane@ACME.com ");
    }

    #[test]
    fn parse_sender_splits_display_name() {
        assert_eq!(
            parse_sender("\"Jane Doe\" <jane@acme.com>"),
            (Some("Jane Doe".to_string()), "jane@acme.com".to_string())
        );
        assert_eq!(parse_sender("jane@acme.com"), (None, "jane@acme.com".to_string()));
    }
}
