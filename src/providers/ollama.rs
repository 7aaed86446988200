//! Local Ollama chat generator.
//!
//! Ollama keeps no conversation state, so the persona goes first as a `system`
//! message on every call, followed by the whole transcript.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error_body, ReplyGenerator};
use crate::config::ChatSettings;
use crate::error::{ProviderError, ProviderResult};
use crate::interview::session::Turn;

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaGenerator {
    pub fn new(client: reqwest::Client, settings: &ChatSettings) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/chat", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    fn request<'a>(&'a self, system: &'a str, transcript: &'a [Turn]) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage { role: "system", content: system });
        messages.extend(transcript.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ReplyGenerator for OllamaGenerator {
    async fn generate(&self, system: &str, transcript: &[Turn]) -> ProviderResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request(system, transcript))
            .send()
            .await
            .map_err(|e| ProviderError::Generation(format!("Request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(ProviderError::Generation(format!("Ollama error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Generation(format!("Parse error: {e}")))?;

        let reply = result.message.content.trim().to_string();
        if reply.is_empty() {
            return Err(ProviderError::Generation("Empty response from Ollama".to_string()));
        }

        debug!(model = %self.model, turns = transcript.len(), reply_chars = reply.len(), "Reply generated");
        Ok(reply)
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn generator() -> OllamaGenerator {
        let mut settings = AppConfig::default().chat;
        settings.provider = "ollama".to_string();
        settings.model = "mistral".to_string();
        settings.base_url = "http://localhost:11434/".to_string();
        OllamaGenerator::new(reqwest::Client::new(), &settings)
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(generator().endpoint, "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_persona_is_prepended_as_system_message() {
        let generator = generator();
        let turns = vec![Turn::user("hello")];
        let json = serde_json::to_value(generator.request("persona", &turns)).unwrap();

        assert_eq!(json["stream"], false);
        assert_eq!(json["model"], "mistral");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "persona");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["options"]["num_predict"], 1000);
    }

    #[test]
    fn test_response_parsing() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"model":"mistral","message":{"role":"assistant","content":" Great, tell me more. "},"done":true}"#,
        )
        .unwrap();
        assert_eq!(response.message.content.trim(), "Great, tell me more.");
    }
}
