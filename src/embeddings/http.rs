//! OpenAI-compatible `/v1/embeddings` backend.

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{Result, ScorecardError};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Blocking client; scoring is synchronous and runs off the async runtime.
pub struct HttpEmbedder {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.api_base.is_empty() {
            return Err(ScorecardError::Config(
                "Embedding API base URL is required for the http backend".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ScorecardError::external("embedding", e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.api_base.trim_end_matches('/'))
    }
}

impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        "http"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| ScorecardError::external("embedding", "empty embedding response"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .map_err(|e| ScorecardError::external("embedding", e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ScorecardError::external("embedding", e.to_string()))?;
        if !status.is_success() {
            return Err(ScorecardError::external(
                "embedding",
                format!("request failed ({}): {}", status, body),
            ));
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&body)?;
        if parsed.data.len() != texts.len() {
            return Err(ScorecardError::external(
                "embedding",
                format!("expected {} vectors, got {}", texts.len(), parsed.data.len()),
            ));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_construction() {
        let config = EmbeddingConfig {
            api_base: "https://embed.example.com/".to_string(),
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert_eq!(embedder.endpoint(), "https://embed.example.com/v1/embeddings");
    }

    #[test]
    fn test_requires_base_url() {
        assert!(HttpEmbedder::new(&EmbeddingConfig::default()).is_err());
    }

    #[test]
    fn test_response_shape() {
        let body = r#"{"data":[{"embedding":[0.5,0.5],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }
}
