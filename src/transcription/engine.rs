//! # Transcription Engine
//!
//! Adapts the local Whisper model to the [`Transcriber`] interface.
//!
//! ## Per-call flow (on a blocking worker thread):
//! 1. Decode the uploaded bytes and resample to 16 kHz mono
//! 2. Optionally keep only voiced audio; no speech at all means an empty transcript
//! 3. Lock the model and decode
//!
//! Inference is CPU/GPU bound and would stall the async runtime, so it always runs
//! through `tokio::task::spawn_blocking`. The mutex serializes concurrent interviews
//! on the single loaded model.

use crate::audio::{processor, vad};
use crate::config::TranscriptionSettings;
use crate::device;
use crate::error::{ProviderError, ProviderResult};
use crate::providers::Transcriber;
use crate::transcription::model::{ModelSize, WhisperModel};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use candle_core::Device;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

pub struct WhisperTranscriber {
    model: Arc<Mutex<WhisperModel>>,
    settings: TranscriptionSettings,
    description: String,
}

impl WhisperTranscriber {
    /// Load the configured checkpoint onto `device`.
    pub async fn load(settings: &TranscriptionSettings, device: Device) -> Result<Self> {
        let size: ModelSize = settings.whisper_model.parse()?;
        let description = format!("whisper-{}@{}", size, device::describe(&device));
        let model = WhisperModel::load(size, settings.language.as_deref(), device).await?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            settings: settings.clone(),
            description,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> ProviderResult<String> {
        let model = Arc::clone(&self.model);
        let settings = self.settings.clone();

        tokio::task::spawn_blocking(move || transcribe_blocking(&model, &settings, &audio))
            .await
            .map_err(|e| ProviderError::Transcription(format!("Transcription worker failed: {}", e)))?
            .map_err(|e| ProviderError::Transcription(e.to_string()))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn transcribe_blocking(
    model: &Mutex<WhisperModel>,
    settings: &TranscriptionSettings,
    audio: &[u8],
) -> Result<String> {
    let start_time = Instant::now();

    let Some(samples) = prepare_speech(audio, settings)? else {
        debug!(audio_bytes = audio.len(), "No speech in recording, skipping model");
        return Ok(String::new());
    };

    let text = {
        let mut model = model.lock().map_err(|_| anyhow!("Whisper model lock poisoned"))?;
        model.transcribe(&samples, settings.beam_size)?
    };

    info!(
        audio_secs = samples.len() as f64 / processor::TARGET_SAMPLE_RATE as f64,
        chars = text.len(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Transcription completed"
    );
    Ok(text)
}

/// Decode and filter one recording. `None` means there is nothing worth decoding.
fn prepare_speech(audio: &[u8], settings: &TranscriptionSettings) -> Result<Option<Vec<f32>>> {
    let samples = processor::prepare_for_whisper(audio, settings.fallback_sample_rate)?;
    if samples.is_empty() {
        return Ok(None);
    }

    if !settings.vad_filter {
        return Ok(Some(samples));
    }

    let speech = vad::speech_only(&samples)?;
    debug!(
        total_samples = samples.len(),
        speech_samples = speech.len(),
        "Voice activity filter applied"
    );
    Ok(if speech.is_empty() { None } else { Some(speech) })
}
