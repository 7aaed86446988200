//! Deepgram Aura text-to-speech.
//!
//! The response body is forwarded as it arrives; chunk boundaries are whatever the
//! network delivers and get normalized later by the turn pipeline.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::debug;

use super::{error_body, AudioStream, SpeechSynthesizer};
use crate::config::SpeechSettings;
use crate::error::{ProviderError, ProviderResult};

pub struct DeepgramSynthesizer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    voice: String,
}

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

impl DeepgramSynthesizer {
    pub fn new(client: reqwest::Client, api_key: String, settings: &SpeechSettings) -> Self {
        Self {
            client,
            api_key,
            endpoint: format!("{}/v1/speak", settings.base_url.trim_end_matches('/')),
            voice: settings.voice.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramSynthesizer {
    async fn synthesize(&self, text: &str) -> ProviderResult<AudioStream> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("model", self.voice.as_str())])
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| ProviderError::Synthesis(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(ProviderError::Synthesis(format!("Deepgram API error {status}: {body}")));
        }

        debug!(voice = %self.voice, text_chars = text.len(), "Speech stream opened");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::Synthesis(format!("Stream interrupted: {e}"))));
        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        format!("deepgram:{}", self.voice)
    }
}
