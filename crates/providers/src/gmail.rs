//! Gmail REST adapter for the [`Mailbox`] capability.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, warn};

use aide_agent::capabilities::{CapabilityError, Mailbox, OutgoingMessage, SentMessage};
use aide_core::config::MailboxConfig;
use aide_core::domain::event::{parse_sender, InboundEvent};
use aide_core::domain::owner::Owner;

use crate::{excerpt, http_client, ProviderError};

const SERVICE: &str = "mailbox";
const BODY_CHAR_LIMIT: usize = 10_000;
const NO_SUBJECT: &str = "(no subject)";

pub struct GmailMailbox {
    client: Client,
    base_url: String,
}

impl GmailMailbox {
    pub fn new(config: &MailboxConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, owner: &Owner, builder: RequestBuilder) -> Result<RequestBuilder, CapabilityError> {
        let token = owner
            .credentials
            .mailbox_token
            .as_ref()
            .ok_or(CapabilityError::NotConnected(SERVICE))?;
        Ok(builder.bearer_auth(token.expose_secret()))
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, CapabilityError> {
        let response = builder.send().await.map_err(|error| CapabilityError::Upstream {
            service: SERVICE,
            message: error.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Upstream {
                service: SERVICE,
                message: format!("Gmail returned {status}: {}", excerpt(&body)),
            });
        }
        response
            .json()
            .await
            .map_err(|error| CapabilityError::Decode { service: SERVICE, message: error.to_string() })
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn fetch_events_since(
        &self,
        owner: &Owner,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, CapabilityError> {
        let list = self.client.get(format!("{}/users/me/messages", self.base_url)).query(&[
            ("q", format!("after:{}", since.timestamp())),
            ("maxResults", limit.to_string()),
        ]);
        let listing = self.send_json(self.authorized(owner, list)?).await?;
        let ids: Vec<&str> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| messages.iter().filter_map(|message| message.get("id")?.as_str()).collect())
            .unwrap_or_default();

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            let detail = self
                .client
                .get(format!("{}/users/me/messages/{id}", self.base_url))
                .query(&[("format", "full")]);
            // One unreadable message must not hide the rest of the sweep.
            match self.send_json(self.authorized(owner, detail)?).await {
                Ok(message) => match parse_message(&message) {
                    Some(event) if event.received_at > since => events.push(event),
                    Some(_) => {}
                    None => warn!(
                        event_name = "mailbox.message.undecodable",
                        owner_id = %owner.id,
                        message_id = id,
                        "message skipped"
                    ),
                },
                Err(error) => warn!(
                    event_name = "mailbox.message.fetch_failed",
                    owner_id = %owner.id,
                    message_id = id,
                    error = %error,
                    "message skipped"
                ),
            }
        }

        events.sort_by(|left, right| left.received_at.cmp(&right.received_at));
        debug!(
            event_name = "mailbox.fetch.finished",
            owner_id = %owner.id,
            events = events.len(),
            "mailbox fetched"
        );
        Ok(events)
    }

    async fn send(
        &self,
        owner: &Owner,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, CapabilityError> {
        let request = self
            .client
            .post(format!("{}/users/me/messages/send", self.base_url))
            .json(&json!({ "raw": encode_raw(message) }));
        let payload = self.send_json(self.authorized(owner, request)?).await?;

        let id = payload.get("id").and_then(Value::as_str).ok_or_else(|| {
            CapabilityError::Decode { service: SERVICE, message: "sent message has no id".to_string() }
        })?;
        Ok(SentMessage {
            id: id.to_string(),
            thread_id: payload.get("threadId").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// RFC 2822 message, base64url without padding.
pub(crate) fn encode_raw(message: &OutgoingMessage) -> String {
    let to = match message.to_name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{name} <{}>", message.to),
        None => message.to.clone(),
    };
    let raw = format!(
        "To: {to}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        message.subject, message.body
    );
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

pub(crate) fn parse_message(message: &Value) -> Option<InboundEvent> {
    let external_id = message.get("id")?.as_str()?.to_string();
    let payload = message.get("payload")?;
    let header = |name: &str| {
        payload
            .get("headers")
            .and_then(Value::as_array)?
            .iter()
            .find(|header| {
                header.get("name").and_then(Value::as_str).is_some_and(|key| key.eq_ignore_ascii_case(name))
            })
            .and_then(|header| header.get("value")?.as_str())
            .map(str::to_string)
    };

    let (sender_name, sender) = parse_sender(&header("From")?);
    let received_at = message
        .get("internalDate")
        .and_then(Value::as_str)
        .and_then(|millis| millis.parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())?;
    let subject = header("Subject").filter(|subject| !subject.trim().is_empty());
    let body: String = extract_text(payload).chars().take(BODY_CHAR_LIMIT).collect();

    Some(InboundEvent {
        external_id,
        sender,
        sender_name,
        subject: subject.unwrap_or_else(|| NO_SUBJECT.to_string()),
        body,
        received_at,
    })
}

/// Prefers `text/plain`, searching nested parts depth first.
fn extract_text(part: &Value) -> String {
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or_default();
    let data = part.get("body").and_then(|body| body.get("data")).and_then(Value::as_str);

    if mime == "text/plain" {
        if let Some(text) = data.and_then(decode_base64url) {
            return text;
        }
    }
    if let Some(parts) = part.get("parts").and_then(Value::as_array) {
        let nested = parts.iter().map(extract_text).find(|text| !text.is_empty());
        if let Some(text) = nested {
            return text;
        }
    }
    if mime != "text/html" {
        if let Some(text) = data.and_then(decode_base64url) {
            return text;
        }
    }
    String::new()
}

fn decode_base64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;

    use aide_agent::capabilities::OutgoingMessage;

    use super::{encode_raw, parse_message};

    fn encoded(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text.as_bytes())
    }

    #[test]
    fn parse_message_prefers_plain_text_part() {
        let message = json!({
            "id": "m-1",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    { "name": "From", "value": "\"Jane Doe\" <jane@acme.com>" },
                    { "name": "subject", "value": "Re: Q3 report" }
                ],
                "parts": [
                    { "mimeType": "text/html", "body": { "data": encoded("<p>html</p>") } },
                    { "mimeType": "text/plain", "body": { "data": encoded("Here it is.") } }
                ]
            }
        });

        let event = parse_message(&message).expect("event");

        assert_eq!(event.external_id, "m-1");
        assert_eq!(event.sender, "jane@acme.com");
        assert_eq!(event.sender_name.as_deref(), Some("Jane Doe"));
        assert_eq!(event.subject, "Re: Q3 report");
        assert_eq!(event.body, "Here it is.");
        assert_eq!(event.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parse_message_defaults_subject_and_rejects_missing_sender() {
        let no_subject = json!({
            "id": "m-2",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [{ "name": "From", "value": "bob@corp.com" }],
                "body": { "data": encoded("hi") }
            }
        });
        assert_eq!(parse_message(&no_subject).expect("event").subject, "(no subject)");

        let no_sender = json!({ "id": "m-3", "internalDate": "1", "payload": { "headers": [] } });
        assert!(parse_message(&no_sender).is_none());
    }

    #[test]
    fn raw_message_carries_display_name() {
        let raw = encode_raw(&OutgoingMessage {
            to: "jane@acme.com".to_string(),
            to_name: Some("Jane".to_string()),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        });

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).expect("base64")).expect("utf8");
        assert!(decoded.starts_with("To: Jane <jane@acme.com>\r\nSubject: Hello\r\n"));
        assert!(decoded.ends_with("\r\n\r\nBody"));
    }
}
