//! Text-generation backend.
//!
//! One synchronous request/response call per conversational turn against
//! an OpenAI-compatible chat-completions endpoint. The orchestrator only
//! sees the [`ResponseGenerator`] trait, so tests substitute scripted
//! generators.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

/// One chat message: the fixed system preamble or the user's utterance.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Text-generation boundary: messages in, one reply string out.
pub trait ResponseGenerator: Send {
    fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// OpenAI-compatible chat-completions client.
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        if cfg.api_key.is_empty() {
            anyhow::bail!("text-generation API key is not configured");
        }
        if cfg.base_url.is_empty() {
            anyhow::bail!("text-generation base URL is not configured");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl ResponseGenerator for ChatClient {
    fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
        };
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.base_url);
            debug!(url = %url, model = %request.model, "Requesting chat completion");

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Chat API error {}: {}", status, body);
            }

            let parsed: ChatResponse = resp.json().await?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default();

            if content.is_empty() {
                anyhow::bail!("Chat response contained no content");
            }
            Ok(content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_chat_completions_shape() {
        let request = ChatRequest {
            model: "qwen-plus".to_string(),
            messages: vec![
                ChatMessage::system("You are a helpful assistant."),
                ChatMessage::user("hello"),
            ],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen-plus");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn response_parses_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hi there");
    }

    #[test]
    fn client_requires_credentials() {
        let cfg = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        assert!(ChatClient::new(&cfg).is_err());
    }
}
