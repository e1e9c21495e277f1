/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::config::{LlmConfig, CONNECT_TIMEOUT, TOTAL_TIMEOUT};
use super::models::ChatMessage;
use crate::errors::{ChatError, ChatResult};

/// Single-call client for an OpenAI-compatible chat-completions endpoint
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One chat-completions round. Returns `choices[0].message` unmodified,
    /// tool calls included.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        tool_choice: Option<&str>,
    ) -> ChatResult<ChatMessage>;
}

pub struct OpenAiClient {
    config: LlmConfig,
    http_client: Client,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> ChatResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| ChatError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn configured(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        tool_choice: Option<&str>,
    ) -> ChatResult<ChatMessage> {
        // Pre-flight: fail before any network call when no key is set
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ChatError::config("LLM API key is not configured"))?;

        let mut request = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
            "temperature": self.config.temperature,
        });
        if let Some(tools) = tools {
            request["tools"] = Value::Array(tools.to_vec());
        }
        if let Some(choice) = tool_choice {
            request["tool_choice"] = Value::String(choice.to_string());
        }

        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model = %self.config.model, with_tools = tools.is_some(), "calling chat completions");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::timeout(format!("LLM request timed out: {}", e))
                } else {
                    ChatError::upstream(format!("LLM request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::upstream(extract_error_detail(
                status.as_u16(),
                &body,
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChatError::upstream(format!("Non-JSON LLM response: {}", e)))?;

        let message = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .ok_or_else(|| ChatError::upstream("LLM response missing choices[0].message"))?;

        serde_json::from_value(message)
            .map_err(|e| ChatError::upstream(format!("Malformed LLM message: {}", e)))
    }
}

/// Best-effort error detail from an upstream failure body
///
/// Tries `error.message`, then a top-level `message`, then the first 300
/// characters of the raw body, then the bare status code.
fn extract_error_detail(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(Value::as_str) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.chars().take(300).collect();
    }
    format!("HTTP {}", status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_preflight() {
        let client = OpenAiClient::new(LlmConfig::default()).unwrap();
        assert!(!client.configured());

        let result = client
            .chat_completion(&[ChatMessage::user("hi")], None, None)
            .await;
        assert!(matches!(result, Err(ChatError::Config { .. })));
    }

    #[test]
    fn test_extract_error_detail_nested() {
        let body = r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#;
        assert_eq!(extract_error_detail(404, body), "model not found");
    }

    #[test]
    fn test_extract_error_detail_flat_message() {
        assert_eq!(
            extract_error_detail(502, r#"{"message": "bad gateway"}"#),
            "bad gateway"
        );
    }

    #[test]
    fn test_extract_error_detail_raw_body_truncated() {
        let body = "x".repeat(500);
        let detail = extract_error_detail(500, &body);
        assert_eq!(detail.len(), 300);
    }

    #[test]
    fn test_extract_error_detail_empty_body() {
        assert_eq!(extract_error_detail(503, "  "), "HTTP 503");
    }
}
