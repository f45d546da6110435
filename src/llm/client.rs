//! OpenAI-compatible chat client used for the automated judge call.

use crate::config::LlmConfig;
use crate::error::{Result, ScorecardError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    /// Some servers send `null` for refusals.
    #[serde(default)]
    content: Option<String>,
}

/// Token accounting reported by the server.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Text of the first choice.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// The server stopped at the token limit; judge JSON is likely cut off.
    pub truncated: bool,
    pub usage: Option<Usage>,
}

/// OpenAI-compatible LLM client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn request<'a>(&'a self, messages: &'a [Message]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: self
                .config
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }

    /// Send one chat completion and return the first choice.
    pub async fn chat(&self, messages: &[Message]) -> Result<Completion> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&self.request(messages))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let usage = parsed.usage;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(ScorecardError::LlmApi("response has no choices".to_string()));
        };

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ScorecardError::LlmApi(format!(
                "empty completion (finish reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let truncated = choice.finish_reason.as_deref() == Some("length");
        if truncated {
            warn!(
                model = %self.config.model,
                max_tokens = self.config.max_tokens,
                "Completion hit the token limit"
            );
        }
        if let Some(usage) = usage {
            debug!(
                model = %self.config.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion finished"
            );
        }

        Ok(Completion {
            content,
            truncated,
            usage,
        })
    }

    /// Check that the endpoint answers at all.
    pub async fn test_connection(&self) -> Result<()> {
        let messages = [Message::user("Reply with the single word: ready")];
        let completion = self.chat(&messages).await?;
        debug!(reply = %completion.content, "Connection test reply");
        Ok(())
    }
}

/// Prefer the server's own error message when the body has one.
fn api_error(status: StatusCode, body: &str) -> ScorecardError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect());
    ScorecardError::LlmApi(format!("{}: {}", status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str, json_mode: bool) -> LlmClient {
        LlmClient::new(LlmConfig {
            api_base: api_base.to_string(),
            api_key: "test".to_string(),
            model: "judge-model".to_string(),
            json_mode,
            ..Default::default()
        })
    }

    #[test]
    fn test_request_shape() {
        let client = client("https://api.example.com", false);
        let messages = [Message::system("rubric"), Message::user("score this")];
        let json = serde_json::to_value(client.request(&messages)).unwrap();

        assert_eq!(json["model"], "judge-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["temperature"], 0.0);
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_json_mode_requests_object() {
        let client = client("https://api.example.com", true);
        let messages = [Message::user("score this")];
        let json = serde_json::to_value(client.request(&messages)).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        assert_eq!(
            client("https://api.example.com/", false).endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            client("https://api.example.com", false).endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_timeout_has_floor() {
        let config = LlmConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(LlmClient::new(config).timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_api_error_prefers_server_message() {
        let err = api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"bad key","type":"auth"}}"#,
        );
        assert!(err.to_string().contains("bad key"));

        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_null_content_deserializes() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null},"finish_reason":"stop"}]}"#)
                .unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let client = client("http://127.0.0.1:9", false);
        assert!(client.test_connection().await.is_err());
    }
}
