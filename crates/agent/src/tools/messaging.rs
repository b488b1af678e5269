use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::capabilities::{Mailbox, OutgoingMessage};

use super::{optional_str, required_str, Tool, ToolContext, ToolError, ToolKind};

pub struct SendMessageTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SendMessageTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SendMessage
    }

    fn description(&self) -> &'static str {
        "Send an email to a recipient from the user's mailbox. Requires recipient address, \
         subject, and body content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient's email address" },
                "to_name": { "type": "string", "description": "Recipient's name (optional)" },
                "subject": { "type": "string", "description": "Email subject line" },
                "body": { "type": "string", "description": "Email body content" }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let to = required_str(arguments, "to")?;
        if !looks_like_address(to) {
            return Err(ToolError::InvalidArguments(format!("`{to}` is not an email address")));
        }
        let message = OutgoingMessage {
            to: to.to_string(),
            to_name: optional_str(arguments, "to_name").map(str::to_string),
            subject: required_str(arguments, "subject")?.to_string(),
            body: required_str(arguments, "body")?.to_string(),
        };

        // Single attempt; a failure is reported and never retried here.
        let sent = self.mailbox.send(&context.owner, &message).await?;

        Ok(json!({
            "message_id": sent.id,
            "thread_id": sent.thread_id,
            "message": format!(
                "Email sent to {}",
                message.to_name.as_deref().unwrap_or(&message.to)
            ),
        }))
    }
}

fn looks_like_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use aide_core::domain::owner::Owner;

    use super::{looks_like_address, SendMessageTool};
    use crate::capabilities::DisabledMailbox;
    use crate::test_support::RecordingMailbox;
    use crate::tools::{ToolContext, ToolRegistry};

    fn context() -> ToolContext {
        ToolContext { owner: Owner::new("owner-1", "owner@corp.com"), conversation_id: None }
    }

    #[tokio::test]
    async fn sends_exactly_one_message() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let mut registry = ToolRegistry::default();
        registry.register(SendMessageTool::new(mailbox.clone()));

        let invocation = registry
            .execute(
                "send_message",
                r#"{"to":"jane@acme.com","to_name":"Jane","subject":"Report","body":"Please send the report."}"#,
                &context(),
            )
            .await;

        assert!(invocation.success);
        assert_eq!(invocation.result["message"], json!("Email sent to Jane"));
        let sent = mailbox.sent.lock().expect("sent lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Report");
    }

    #[tokio::test]
    async fn disconnected_mailbox_becomes_failure_payload() {
        let mut registry = ToolRegistry::default();
        registry.register(SendMessageTool::new(Arc::new(DisabledMailbox)));

        let invocation = registry
            .execute("send_message", r#"{"to":"jane@acme.com","subject":"s","body":"b"}"#, &context())
            .await;

        assert!(!invocation.success);
        assert_eq!(invocation.result["error"], json!("mailbox is not connected for this account"));
    }

    #[test]
    fn address_check_rejects_obvious_garbage() {
        assert!(looks_like_address("jane@acme.com"));
        assert!(!looks_like_address("jane"));
        assert!(!looks_like_address("@acme.com"));
        assert!(!looks_like_address("jane doe@acme.com"));
    }
}
