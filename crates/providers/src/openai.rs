use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use aide_agent::llm::{
    ChatMessage, Completion, CompletionRequest, LlmClient, LlmError, ToolCallRequest,
};
use aide_core::config::LlmConfig;

use crate::{excerpt, http_client, ProviderError};

/// Chat completions against any OpenAI-compatible `/chat/completions`.
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", config.endpoint()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = request_body(&self.model, &request);
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body: excerpt(&body) });
        }
        let payload: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;

        let completion = parse_completion(&payload)?;
        debug!(
            event_name = "llm.completion.received",
            model = %self.model,
            tool_calls = completion.tool_calls.len(),
            "chat completion received"
        );
        Ok(completion)
    }
}

pub(crate) fn request_body(model: &str, request: &CompletionRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_json).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|schema| {
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = Value::String(request.tool_choice.as_str().to_string());
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

fn message_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(content) => json!({ "role": "system", "content": content }),
        ChatMessage::User(content) => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": content })
        }
        ChatMessage::Assistant { content, tool_calls } => {
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        ChatMessage::Tool { call_id, name, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "name": name,
            "content": content,
        }),
    }
}

pub(crate) fn parse_completion(payload: &Value) -> Result<Completion, LlmError> {
    let message = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::Decode("response has no choices[0].message".to_string()))?;

    let text = message.get("content").and_then(Value::as_str).map(str::to_string);
    let mut tool_calls = Vec::new();
    for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
        let function = call
            .get("function")
            .ok_or_else(|| LlmError::Decode("tool call without function".to_string()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::Decode("tool call without name".to_string()))?;
        // Arguments normally arrive as a JSON string; some servers send an object.
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) => raw.clone(),
            Some(Value::Null) | None => "{}".to_string(),
            Some(other) => other.to_string(),
        };
        tool_calls.push(ToolCallRequest {
            id: call.get("id").and_then(Value::as_str).unwrap_or(name).to_string(),
            name: name.to_string(),
            arguments,
        });
    }

    Ok(Completion { text, tool_calls })
}

#[cfg(test)]
mod tests {
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    use aide_agent::llm::{
        ChatMessage, CompletionRequest, LlmClient, LlmError, ToolChoice, ToolSchema,
    };
    use aide_core::config::AppConfig;

    use super::{parse_completion, request_body, OpenAiChatClient};

    #[test]
    fn request_body_carries_tools_and_tool_history() {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::System("be brief".to_string()),
                ChatMessage::Assistant {
                    content: None,
                    tool_calls: vec![aide_agent::llm::ToolCallRequest {
                        id: "call-1".to_string(),
                        name: "list_tasks".to_string(),
                        arguments: "{}".to_string(),
                    }],
                },
                ChatMessage::Tool {
                    call_id: "call-1".to_string(),
                    name: "list_tasks".to_string(),
                    content: "{\"success\":true}".to_string(),
                },
            ],
            tools: vec![ToolSchema {
                name: "list_tasks",
                description: "List tasks",
                parameters: json!({ "type": "object", "properties": {} }),
            }],
            tool_choice: ToolChoice::Auto,
            temperature: 0.7,
            max_tokens: None,
        };

        let body = request_body("gpt-4o-mini", &request);

        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "list_tasks");
        assert_eq!(body["messages"][1]["tool_calls"][0]["id"], "call-1");
        assert_eq!(body["messages"][2]["role"], "tool");
        assert_eq!(body["messages"][2]["tool_call_id"], "call-1");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn prompt_without_tools_omits_tool_choice() {
        let body = request_body("m", &CompletionRequest::prompt("hi", 0.5));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn parse_completion_reads_text_and_tool_calls() {
        let payload = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        { "id": "c1", "type": "function", "function": { "name": "send_message", "arguments": "{\"to\":\"a@b.co\"}" } },
                        { "id": "c2", "type": "function", "function": { "name": "list_tasks", "arguments": { "scope": "owner" } } }
                    ]
                }
            }]
        });

        let completion = parse_completion(&payload).expect("parse");

        assert_eq!(completion.text, None);
        assert_eq!(completion.tool_calls.len(), 2);
        assert_eq!(completion.tool_calls[0].arguments, "{\"to\":\"a@b.co\"}");
        assert_eq!(completion.tool_calls[1].arguments, "{\"scope\":\"owner\"}");
        assert!(matches!(parse_completion(&json!({ "choices": [] })), Err(LlmError::Decode(_))));
    }

    #[tokio::test]
    async fn client_posts_to_chat_completions() {
        async fn reply(Json(body): Json<Value>) -> Json<Value> {
            let echoed = body["messages"][0]["content"].as_str().unwrap_or_default().to_uppercase();
            Json(json!({ "choices": [{ "message": { "role": "assistant", "content": echoed } }] }))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        let app = Router::new().route("/v1/chat/completions", post(reply));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut config = AppConfig::default().llm;
        config.base_url = Some(format!("http://{address}/v1"));
        let client = OpenAiChatClient::new(&config).expect("client");

        let text = client.generate("hello", 0.2).await.expect("generate");
        assert_eq!(text, "HELLO");
    }
}
