//! OpenAI-compatible chat completions backend

use crate::backend::ClassificationBackend;
use async_trait::async_trait;
use convoclass_core::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for a chat completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiBackendConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for OpenAiBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Backend that posts each prompt as a single user message
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    config: OpenAiBackendConfig,
}

impl OpenAiBackend {
    /// Create a backend with its own HTTP client
    pub fn new(config: OpenAiBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    /// Model identifier requests are sent to
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ClassificationBackend for OpenAiBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(request_error)?;
        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            debug!(status = %status, detail = %detail, "Classification service rejected request");
            return Err(status_error(status, &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("Unreadable response payload: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::backend("Response contained no message content"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else if err.is_connect() || err.is_request() {
        Error::transient(format!("Request failed: {}", err))
    } else {
        Error::backend(format!("Request failed: {}", err))
    }
}

fn status_error(status: StatusCode, detail: &str) -> Error {
    let msg = format!("HTTP {}: {}", status.as_u16(), truncate(detail, 200));

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::transient(msg)
    } else {
        Error::backend(msg)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn test_endpoint_normalized() {
        let backend = OpenAiBackend::new(OpenAiBackendConfig {
            base_url: "http://localhost:8000/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(backend.endpoint, "http://localhost:8000/v1/chat/completions");
        assert_eq!(backend.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_response_payload() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"yes, 4"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("yes, 4"));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
