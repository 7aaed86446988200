//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! API credentials are deliberately NOT part of `AppConfig`: they are read once from the
//! process environment into [`Credentials`] and never serialized or exposed over HTTP.
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_CHAT__TEMPERATURE, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each external collaborator (speech-to-text, chat model, speech synthesis) gets its
/// own section so the knobs it passes through stay next to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionSettings,
    pub chat: ChatSettings,
    pub speech: SpeechSettings,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Speech-to-text settings passed through to the Whisper adapter.
///
/// ## Fields:
/// - `whisper_model`: tiny, base, small, medium or large
/// - `device`: auto, cpu, cuda or metal
/// - `language`: ISO 639-1 hint given to the decoder
/// - `beam_size`: decoding beam width
/// - `vad_filter`: drop non-speech audio before decoding
/// - `fallback_sample_rate`: rate assumed for audio that arrives without a WAV header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub whisper_model: String,
    pub device: String,
    pub language: Option<String>,
    pub beam_size: usize,
    pub vad_filter: bool,
    pub fallback_sample_rate: u32,
}

/// Reply-generation settings.
///
/// `provider` selects the backend: `anthropic` (hosted) or `ollama` (local).
/// `base_url` only applies to `ollama`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
}

/// Speech-synthesis settings.
///
/// `chunk_size` is the size of each binary frame sent to the client; the last frame
/// of an utterance may be shorter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSettings {
    pub voice: String,
    pub base_url: String,
    pub chunk_size: usize,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Interviews allowed to run at the same time; further upgrades get HTTP 503
    pub max_concurrent_sessions: usize,
}

/// Chat backends understood by [`ChatSettings::provider`].
pub const CHAT_PROVIDERS: &[&str] = &["anthropic", "ollama"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,
            },
            transcription: TranscriptionSettings {
                whisper_model: "base".to_string(),
                device: "cpu".to_string(),
                language: Some("en".to_string()),
                beam_size: 5,
                vad_filter: true,
                fallback_sample_rate: 44100,
            },
            chat: ChatSettings {
                provider: "anthropic".to_string(),
                model: "claude-3-opus-20240229".to_string(),
                max_tokens: 1000,
                temperature: 0.7,  // Consistent but not deterministic phrasing
                base_url: "http://localhost:11434".to_string(),
            },
            speech: SpeechSettings {
                voice: "aura-orpheus-en".to_string(),
                base_url: "https://api.deepgram.com".to_string(),
                chunk_size: 1024,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_CHAT__PROVIDER=ollama`: Use a local Ollama model
    /// - `APP_TRANSCRIPTION__BEAM_SIZE=1`: Greedy decoding
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    ///
    /// Sections are separated by a double underscore because field names already
    /// contain single underscores.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A bad value here would otherwise only surface in the middle of an interview,
    /// when a provider rejects the request and the connection is dropped.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.transcription.whisper_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Whisper model name cannot be empty"));
        }

        if let Err(e) = self.transcription.device.parse::<crate::device::DevicePreference>() {
            return Err(anyhow::anyhow!(e));
        }

        if self.transcription.beam_size == 0 {
            return Err(anyhow::anyhow!("Beam size must be greater than 0"));
        }

        if self.transcription.fallback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Fallback sample rate must be greater than 0"));
        }

        if !CHAT_PROVIDERS.contains(&self.chat.provider.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown chat provider '{}' (expected one of: {})",
                self.chat.provider,
                CHAT_PROVIDERS.join(", ")
            ));
        }

        if self.chat.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Chat model name cannot be empty"));
        }

        if self.chat.max_tokens == 0 {
            return Err(anyhow::anyhow!("Chat max_tokens must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.chat.temperature) {
            return Err(anyhow::anyhow!(
                "Chat temperature must be between 0.0 and 1.0, got {}",
                self.chat.temperature
            ));
        }

        if self.speech.voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Speech voice cannot be empty"));
        }

        if self.speech.chunk_size == 0 {
            return Err(anyhow::anyhow!("Speech chunk size must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Whether the hosted chat backend (and therefore its API key) is in use.
    pub fn uses_anthropic(&self) -> bool {
        self.chat.provider == "anthropic"
    }
}

/// API credentials resolved once at process start.
///
/// `Debug` is implemented by hand so keys never end up in logs.
#[derive(Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
}

impl Credentials {
    /// Read `ANTHROPIC_API_KEY` and `DEEPGRAM_API_KEY` from the environment.
    /// Empty values count as missing.
    pub fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            anthropic_api_key: read("ANTHROPIC_API_KEY"),
            deepgram_api_key: read("DEEPGRAM_API_KEY"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |key: &Option<String>| if key.is_some() { "***SET***" } else { "<missing>" };
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("deepgram_api_key", &mask(&self.deepgram_api_key))
            .finish()
    }
}
