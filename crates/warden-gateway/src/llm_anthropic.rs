//! Concrete `LlmAdapter` for the Anthropic Messages API, the one LLM
//! provider backing the ObservationPipeline (E) and ChannelObserver
//! judge (G), trimmed to the single non-streaming `complete` call these
//! two pipelines need.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use warden_core::error::WardenError;
use warden_core::llm::LlmAdapter;
use warden_core::Result;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicLlmAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicLlmAdapter {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
        }
    }
}

#[async_trait]
impl LlmAdapter for AnthropicLlmAdapter {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": system_prompt,
            "messages": [{ "role": "user", "content": user_prompt }],
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(WardenError::Generic(format!("Anthropic API returned {status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await.map_err(|e| WardenError::Network(e.to_string()))?;
        Ok(extract_text(&value))
    }
}

fn extract_text(value: &serde_json::Value) -> String {
    value["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_adapter_defaults_base_url() {
        let adapter = AnthropicLlmAdapter::new("key".to_string(), "claude-opus".to_string(), None);
        assert_eq!(adapter.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn new_adapter_honors_custom_base_url() {
        let adapter = AnthropicLlmAdapter::new("key".to_string(), "claude-opus".to_string(), Some("https://proxy.internal".to_string()));
        assert_eq!(adapter.base_url, "https://proxy.internal");
    }

    #[test]
    fn extract_text_finds_first_text_block() {
        let value = json!({
            "content": [
                { "type": "tool_use", "id": "t1" },
                { "type": "text", "text": "hello there" }
            ]
        });
        assert_eq!(extract_text(&value), "hello there");
    }

    #[test]
    fn extract_text_defaults_to_empty_when_missing() {
        let value = json!({ "content": [] });
        assert_eq!(extract_text(&value), "");
    }
}
