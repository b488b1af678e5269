use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use aide_core::config::EmbeddingConfig;
use aide_core::retrieval::{Embedder, EmbeddingError};

use crate::{excerpt, http_client, ProviderError};

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dimensions,
        });
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| EmbeddingError(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError(format!(
                "embedding endpoint returned {status}: {}",
                excerpt(&body)
            )));
        }
        let payload: Value =
            response.json().await.map_err(|error| EmbeddingError(error.to_string()))?;

        parse_embedding_response(&payload)?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError("embedding response had no vectors".to_string()))
    }
}

fn parse_embedding_response(payload: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError("embedding response is missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(fallback_index);
        let values = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError("embedding item missing embedding array".to_string()))?;
        let vector = values
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .map(|number| number as f32)
                    .ok_or_else(|| EmbeddingError("embedding value must be numeric".to_string()))
            })
            .collect::<Result<Vec<f32>, _>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
