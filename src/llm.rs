//! Chat-completion client shared by the model under test and the judge.
//!
//! Both sides speak the OpenAI-compatible `/chat/completions` shape, so one
//! client type covers every provider the harness is pointed at.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ApiConfig, MAX_RETRIES, REQUEST_TIMEOUT_SECS};
use crate::error::{HarnessError, Result};
use crate::evaluation::{Message, ModelConfig};

/// Outgoing chat-completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Request against `config`'s model with its sampling settings.
    pub fn for_model(config: &ModelConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ChatResponse {
    /// Response with a single choice carrying `content`.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
            }],
            usage: None,
        }
    }

    /// Text of the first choice; empty when the provider returned none.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default()
    }
}

/// A chat-completion endpoint.
///
/// Timeouts and retries belong to the implementation, not to callers.
pub trait ChatClient: Send + Sync {
    fn chat(&self, request: &ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send;
}

/// HTTP client for OpenAI-compatible endpoints (OpenRouter, OpenAI, local proxies).
#[derive(Clone)]
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: completions_url(base_url),
            api_key: api_key.into(),
            max_retries: MAX_RETRIES,
            http,
        })
    }

    /// Build a client from the `api` section, resolving the key from the environment.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        let key = api.resolve_api_key()?;
        Self::new(&api.base_url, key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|source| HarnessError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(HarnessError::Provider { status, body });
        }

        let body = resp.text().await.map_err(|source| HarnessError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        })?;
        decode_response(&self.endpoint, &body)
    }
}

impl ChatClient for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            debug!("Calling {} (attempt {}) ...", request.model, attempt + 1);
            match self.send_once(request).await {
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    warn!("Retrying {} after error: {}", request.model, e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// A 2xx body that isn't a chat completion is final; retrying won't fix it.
fn decode_response(endpoint: &str, body: &str) -> Result<ChatResponse> {
    serde_json::from_str(body).map_err(|e| HarnessError::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Role;

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:4000/v1"),
            "http://localhost:4000/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let config = ModelConfig::new("m", "vendor/model");
        let request = ChatRequest::for_model(
            &config,
            vec![Message::system("be brief"), Message::user("hi")],
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "vendor/model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 2048);
        assert!(body["temperature"].as_f64().is_some());
        assert_eq!(request.messages[0].role, Role::System);
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.content(), "Hello!");
        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[test]
    fn test_missing_content_is_empty() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert_eq!(resp.content(), "");

        let resp: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(resp.content(), "");
    }

    #[test]
    fn test_malformed_success_body_is_not_retried() {
        let err = decode_response("http://localhost:4000/v1/chat/completions", "<html>gateway</html>")
            .unwrap_err();
        assert!(matches!(err, HarnessError::MalformedResponse { .. }));
        assert!(!err.is_retryable());

        let ok = decode_response("e", r#"{"choices": [{"message": {"content": "hi"}}]}"#).unwrap();
        assert_eq!(ok.content(), "hi");
    }

    #[test]
    fn test_client_endpoint() {
        let client = OpenAiClient::new("http://localhost:4000/v1/", "sk-test").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:4000/v1/chat/completions");
    }
}
