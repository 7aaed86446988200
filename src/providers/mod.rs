//! # Provider Adapters
//!
//! The three external capabilities an interview needs, each behind an async trait so
//! the turn pipeline never knows which service sits behind it:
//!
//! - **Transcriber**: complete audio container → text
//! - **ReplyGenerator**: persona + transcript → one assistant utterance
//! - **SpeechSynthesizer**: text → ordered stream of audio chunks
//!
//! All adapters are stateless per call. They are created once at startup, wrapped in
//! `Arc`, and the same handles are shared by every connection.

pub mod anthropic;
pub mod deepgram;
pub mod ollama;

use crate::config::{AppConfig, Credentials};
use crate::error::{ProviderError, ProviderResult};
use crate::interview::session::Turn;
use crate::transcription::WhisperTranscriber;

use actix_web::web::Bytes;
use async_trait::async_trait;
use candle_core::Device;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Lazily produced synthesized speech, in playback order.
pub type AudioStream = BoxStream<'static, ProviderResult<Bytes>>;

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one complete recording. Empty or silent audio yields an empty string.
    async fn transcribe(&self, audio: Vec<u8>) -> ProviderResult<String>;

    /// Human-readable description for logs and health output.
    fn describe(&self) -> String;
}

/// Chat model producing the interviewer's next utterance.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `system` is the fixed persona; `transcript` is the whole conversation so far,
    /// alternating user/assistant and starting with the user.
    async fn generate(&self, system: &str, transcript: &[Turn]) -> ProviderResult<String>;

    fn describe(&self) -> String;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesis. Errors before the first chunk are returned here; errors while
    /// streaming come out of the stream.
    async fn synthesize(&self, text: &str) -> ProviderResult<AudioStream>;

    fn describe(&self) -> String;
}

/// The shared adapter handles injected into every connection.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Providers {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self { transcriber, generator, synthesizer }
    }

    /// Build every adapter from configuration. Loads the Whisper model, which may
    /// download weights on first run.
    pub async fn from_config(
        config: &AppConfig,
        credentials: &Credentials,
        device: Device,
    ) -> anyhow::Result<Self> {
        let http = http_client()?;

        let generator: Arc<dyn ReplyGenerator> = if config.uses_anthropic() {
            let api_key = credentials.anthropic_api_key.clone().ok_or_else(|| {
                ProviderError::Credentials("ANTHROPIC_API_KEY is not set".to_string())
            })?;
            Arc::new(anthropic::AnthropicGenerator::new(http.clone(), api_key, &config.chat))
        } else {
            Arc::new(ollama::OllamaGenerator::new(http.clone(), &config.chat))
        };

        let deepgram_key = credentials.deepgram_api_key.clone().ok_or_else(|| {
            ProviderError::Credentials("DEEPGRAM_API_KEY is not set".to_string())
        })?;
        let synthesizer: Arc<dyn SpeechSynthesizer> =
            Arc::new(deepgram::DeepgramSynthesizer::new(http, deepgram_key, &config.speech));

        let transcriber: Arc<dyn Transcriber> =
            Arc::new(WhisperTranscriber::load(&config.transcription, device).await?);

        let providers = Self::new(transcriber, generator, synthesizer);
        info!(
            transcriber = %providers.transcriber.describe(),
            generator = %providers.generator.describe(),
            synthesizer = %providers.synthesizer.describe(),
            "Providers initialized"
        );
        Ok(providers)
    }
}

/// Shared HTTP client for the hosted providers.
///
/// Only the connect phase is bounded. Requests themselves have no timeout, so a hung
/// provider keeps the interview waiting.
fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Read an error response body for logging, without failing on unreadable bodies.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.len() > 512 {
        let mut end = 512;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
