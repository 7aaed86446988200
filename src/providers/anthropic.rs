//! Anthropic Messages API reply generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error_body, ReplyGenerator};
use crate::config::ChatSettings;
use crate::error::{ProviderError, ProviderResult};
use crate::interview::session::Turn;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(client: reqwest::Client, api_key: String, settings: &ChatSettings) -> Self {
        Self {
            client,
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    fn request<'a>(&'a self, system: &'a str, transcript: &'a [Turn]) -> MessageRequest<'a> {
        MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: transcript,
        }
    }
}

/// Join the text blocks of a response. Non-text blocks are skipped.
fn reply_text(response: MessageResponse) -> ProviderResult<String> {
    let reply = response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ProviderError::Generation("Empty response from Anthropic".to_string()));
    }
    Ok(reply.to_string())
}

#[async_trait]
impl ReplyGenerator for AnthropicGenerator {
    async fn generate(&self, system: &str, transcript: &[Turn]) -> ProviderResult<String> {
        let request = self.request(system, transcript);

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Generation(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(ProviderError::Generation(format!("Anthropic API error {status}: {body}")));
        }

        let result: MessageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Generation(format!("Parse error: {e}")))?;

        let reply = reply_text(result)?;
        debug!(model = %self.model, turns = transcript.len(), reply_chars = reply.len(), "Reply generated");
        Ok(reply)
    }

    fn describe(&self) -> String {
        format!("anthropic:{}", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn generator() -> AnthropicGenerator {
        AnthropicGenerator::new(reqwest::Client::new(), "test-key".to_string(), &AppConfig::default().chat)
    }

    #[test]
    fn test_request_carries_persona_and_turns() {
        let generator = generator();
        let turns = vec![Turn::user("hello"), Turn::assistant("Tell me more."), Turn::user("sure")];
        let json = serde_json::to_value(generator.request("be an interviewer", &turns)).unwrap();

        assert_eq!(json["model"], "claude-3-opus-20240229");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["system"], "be an interviewer");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "Tell me more.");
        assert_eq!(json["messages"].as_array().unwrap().len(), 3);
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_reply_text_joins_text_blocks() {
        let response: MessageResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Thanks. "},{"type":"tool_use","id":"x"},{"type":"text","text":"What did you build?"}]}"#,
        )
        .unwrap();
        assert_eq!(reply_text(response).unwrap(), "Thanks. What did you build?");
    }

    #[test]
    fn test_empty_reply_is_an_error() {
        let response: MessageResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        let err = reply_text(response).unwrap_err();
        assert_eq!(err.stage(), "generation");
    }

    #[test]
    fn test_describe_names_the_model() {
        assert_eq!(generator().describe(), "anthropic:claude-3-opus-20240229");
    }
}
