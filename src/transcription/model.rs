//! # Whisper Model
//!
//! Loads a Whisper checkpoint from the Hugging Face hub and decodes 16 kHz mono audio
//! into text with candle.
//!
//! ## Loading Process:
//! 1. Download `config.json`, `tokenizer.json` and `model.safetensors` (cached locally)
//! 2. Resolve the special token ids from the tokenizer
//! 3. Build the mel filterbank and the logit suppression mask
//! 4. Map the weights onto the selected device
//!
//! ## Decoding:
//! The log-mel spectrogram is cut into 30 s windows. Each window is encoded once and
//! decoded with beam search. A window the model considers silent (high no-speech
//! probability and low average log-probability) contributes no text.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Available Whisper checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Special token ids looked up from the tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: u32,
    language: Option<u32>,
}

/// One beam search hypothesis. `tokens` includes the prompt.
#[derive(Debug, Clone, PartialEq)]
struct Hypothesis {
    tokens: Vec<u32>,
    logprob: f32,
}

/// Outcome of decoding one 30 s window.
#[derive(Debug, Clone)]
struct WindowResult {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

impl WindowResult {
    fn is_silent(&self) -> bool {
        self.no_speech_prob > m::NO_SPEECH_THRESHOLD && self.avg_logprob < m::LOGPROB_THRESHOLD
    }
}

/// A loaded Whisper model ready for transcription.
///
/// Decoding mutates the decoder's attention cache, so callers need `&mut self`; the
/// transcriber keeps the model behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    /// 0 for allowed tokens, -inf for suppressed ones; added to every logit vector
    suppress: Tensor,
    tokens: SpecialTokens,
}

impl WhisperModel {
    /// Download (or reuse from cache) and load a checkpoint.
    pub async fn load(size: ModelSize, language: Option<&str>, device: Device) -> Result<Self> {
        info!("Loading Whisper {} model from {}", size, size.repo_name());
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new()
                .with_token(std::env::var("HF_TOKEN").ok())
                .with_progress(false);
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                debug!("Using Hugging Face cache dir: {}", cache_dir);
                builder = builder.with_cache_dir(cache_dir.into());
            } else if let Ok(hf_home) = std::env::var("HF_HOME") {
                builder = builder.with_cache_dir(std::path::PathBuf::from(hf_home).join("hub"));
            }
            builder
                .build()
                .map_err(|e| anyhow!("Failed to create Hugging Face API client: {}", e))?
        };

        let repo = api.model(size.repo_name().to_string());
        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = resolve_special_tokens(&tokenizer, language)?;

        let mel_filters = mel_filters(config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE);
        let suppress = suppression_mask(&config, &tokens);
        let suppress = Tensor::new(suppress.as_slice(), &device)?;

        // Safety: the weights file is not modified while the model is alive
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            suppress,
            tokens,
        })
    }

    /// Transcribe 16 kHz mono samples. Window texts are joined with single spaces.
    pub fn transcribe(&mut self, pcm: &[f32], beam_size: usize) -> Result<String> {
        if pcm.is_empty() {
            return Ok(String::new());
        }
        let start_time = std::time::Instant::now();

        let n_mels = self.config.num_mel_bins;
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        let (_, _, content_frames) = mel.dims3()?;

        let mut texts = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let segment_size = usize::min(content_frames - seek, m::N_FRAMES);
            let segment = mel.narrow(2, seek, segment_size)?;
            seek += segment_size;

            let window = self.decode_window(&segment, beam_size.max(1))?;
            if window.is_silent() {
                debug!(
                    no_speech_prob = window.no_speech_prob,
                    avg_logprob = window.avg_logprob,
                    "Skipping silent window"
                );
                continue;
            }
            let text = window.text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }

        let text = texts.join(" ");
        debug!(
            "Transcribed {:.2}s of audio in {:.2}s",
            pcm.len() as f64 / m::SAMPLE_RATE as f64,
            start_time.elapsed().as_secs_f64()
        );
        Ok(text)
    }

    fn prompt(&self) -> Vec<u32> {
        let mut prompt = vec![self.tokens.sot];
        if let Some(language) = self.tokens.language {
            prompt.push(language);
        }
        prompt.push(self.tokens.transcribe);
        prompt.push(self.tokens.no_timestamps);
        prompt
    }

    fn decode_window(&mut self, mel: &Tensor, beam_size: usize) -> Result<WindowResult> {
        let audio_features = self.model.encoder.forward(mel, true)?;
        let prompt = self.prompt();
        let sample_len = self.config.max_target_positions / 2;

        let mut beams = vec![Hypothesis { tokens: prompt.clone(), logprob: 0.0 }];
        let mut finished: Vec<Hypothesis> = Vec::new();
        let mut no_speech_prob = 0.0f64;

        for step in 0..sample_len {
            let mut candidates = Vec::with_capacity(beams.len() * beam_size);

            for (beam_index, beam) in beams.iter().enumerate() {
                let tokens_t = Tensor::new(beam.tokens.as_slice(), &self.device)?.unsqueeze(0)?;
                // The cross-attention cache only has to be rebuilt for a new window
                let ys = self.model.decoder.forward(&tokens_t, &audio_features, step == 0)?;

                if step == 0 {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = softmax(&logits, 0)?
                        .i(self.tokens.no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }

                let (_, seq_len, _) = ys.dims3()?;
                let logits = self
                    .model
                    .decoder
                    .final_linear(&ys.i((..1, seq_len - 1..))?)?
                    .i(0)?
                    .i(0)?;
                let logits = logits.broadcast_add(&self.suppress)?;
                let logprobs = log_softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

                for (token, logprob) in top_k(&logprobs, beam_size) {
                    candidates.push((beam_index, token, beam.logprob + logprob));
                }
            }

            let next = advance_beams(&beams, candidates, self.tokens.eot, beam_size, &mut finished);
            if finished.len() >= beam_size || next.is_empty() {
                break;
            }
            beams = next;
        }

        if finished.is_empty() {
            finished = beams;
        }
        let best = best_hypothesis(&finished, prompt.len())
            .ok_or_else(|| anyhow!("Beam search produced no hypothesis"))?;

        let generated = &best.tokens[prompt.len()..];
        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(WindowResult {
            text,
            avg_logprob: best.logprob as f64 / (generated.len() + 1) as f64,
            no_speech_prob,
        })
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no id for {}", token))
}

fn resolve_special_tokens(tokenizer: &Tokenizer, language: Option<&str>) -> Result<SpecialTokens> {
    let no_speech = m::NO_SPEECH_TOKENS
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .ok_or_else(|| anyhow!("Tokenizer has no no-speech token"))?;
    let language = match language {
        Some(code) => Some(token_id(tokenizer, &format!("<|{}|>", code.to_lowercase()))?),
        None => None,
    };

    Ok(SpecialTokens {
        sot: token_id(tokenizer, m::SOT_TOKEN)?,
        eot: token_id(tokenizer, m::EOT_TOKEN)?,
        transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
        no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
        no_speech,
        language,
    })
}

/// Additive logit mask: the checkpoint's suppressed tokens plus every special token
/// after end-of-text (task, language and timestamp tokens).
fn suppression_mask(config: &Config, tokens: &SpecialTokens) -> Vec<f32> {
    (0..config.vocab_size as u32)
        .map(|id| {
            if config.suppress_tokens.contains(&id) || id >= tokens.sot {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect()
}

/// The `k` most likely tokens, best first. Suppressed (-inf) entries never qualify.
fn top_k(logprobs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = logprobs
        .iter()
        .enumerate()
        .filter(|(_, logprob)| logprob.is_finite())
        .map(|(id, &logprob)| (id as u32, logprob))
        .collect();

    let k = k.min(indexed.len());
    if k == 0 {
        return Vec::new();
    }
    indexed.select_nth_unstable_by(k - 1, |a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
}

/// Pick the next beams from all candidates. Candidates ending in `eot` move to
/// `finished` instead.
fn advance_beams(
    beams: &[Hypothesis],
    mut candidates: Vec<(usize, u32, f32)>,
    eot: u32,
    beam_size: usize,
    finished: &mut Vec<Hypothesis>,
) -> Vec<Hypothesis> {
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut next = Vec::with_capacity(beam_size);
    for (beam_index, token, logprob) in candidates {
        if next.len() >= beam_size {
            break;
        }
        let parent = &beams[beam_index].tokens;
        if token == eot {
            if finished.len() < beam_size {
                finished.push(Hypothesis { tokens: parent.clone(), logprob });
            }
        } else {
            let mut tokens = parent.clone();
            tokens.push(token);
            next.push(Hypothesis { tokens, logprob });
        }
    }
    next
}

/// Highest length-normalized log-probability.
fn best_hypothesis(hypotheses: &[Hypothesis], prompt_len: usize) -> Option<&Hypothesis> {
    let score = |h: &Hypothesis| {
        let generated = h.tokens.len().saturating_sub(prompt_len).max(1);
        h.logprob / generated as f32
    };
    hypotheses.iter().max_by(|a, b| score(a).total_cmp(&score(b)))
}

/// Slaney-style mel filterbank, `n_mels` rows of `n_fft / 2 + 1` weights.
pub fn mel_filters(n_mels: usize, n_fft: usize, sample_rate: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel in 0..n_mels {
        let (lower, center, upper) = (mel_points[mel], mel_points[mel + 1], mel_points[mel + 2]);
        let norm = 2.0 / (upper - lower);
        for bin in 0..n_freqs {
            let freq = bin as f64 * sample_rate as f64 / n_fft as f64;
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[mel * n_freqs + bin] = (weight * norm) as f32;
        }
    }
    filters
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz < MEL_MIN_LOG_HZ {
        hz / MEL_F_SP
    } else {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel < MEL_MIN_LOG_MEL {
        mel * MEL_F_SP
    } else {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
        assert_eq!(ModelSize::Tiny.to_string(), "tiny");
        assert!("huge".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_mel_scale_round_trip() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_mel_filters_shape_and_coverage() {
        let filters = mel_filters(80, 400, 16000);
        assert_eq!(filters.len(), 80 * 201);
        assert!(filters.iter().all(|w| *w >= 0.0 && w.is_finite()));
        for mel in 0..80 {
            let row = &filters[mel * 201..(mel + 1) * 201];
            assert!(row.iter().any(|w| *w > 0.0), "mel band {} is empty", mel);
        }
    }

    #[test]
    fn test_top_k_skips_suppressed_tokens() {
        let logprobs = [-1.0, f32::NEG_INFINITY, -0.5, -3.0, -0.1];
        assert_eq!(top_k(&logprobs, 2), vec![(4, -0.1), (2, -0.5)]);
        assert_eq!(top_k(&logprobs, 10).len(), 4);
        assert!(top_k(&[f32::NEG_INFINITY], 3).is_empty());
    }

    #[test]
    fn test_advance_beams_moves_eot_to_finished() {
        let eot = 99;
        let beams = vec![
            Hypothesis { tokens: vec![1, 2], logprob: -0.2 },
            Hypothesis { tokens: vec![1, 3], logprob: -0.4 },
        ];
        let candidates = vec![(0, eot, -0.3), (0, 7, -0.5), (1, 8, -0.6), (1, 9, -2.0)];
        let mut finished = Vec::new();

        let next = advance_beams(&beams, candidates, eot, 2, &mut finished);

        assert_eq!(finished, vec![Hypothesis { tokens: vec![1, 2], logprob: -0.3 }]);
        assert_eq!(
            next,
            vec![
                Hypothesis { tokens: vec![1, 2, 7], logprob: -0.5 },
                Hypothesis { tokens: vec![1, 3, 8], logprob: -0.6 },
            ]
        );
    }

    #[test]
    fn test_best_hypothesis_is_length_normalized() {
        let prompt_len = 2;
        let short = Hypothesis { tokens: vec![0, 0, 5], logprob: -1.0 };
        let long = Hypothesis { tokens: vec![0, 0, 5, 6, 7, 8], logprob: -2.0 };
        let hypotheses = [short, long.clone()];
        assert_eq!(best_hypothesis(&hypotheses, prompt_len), Some(&long));
        assert_eq!(best_hypothesis(&[], prompt_len), None);
    }

    #[test]
    fn test_silent_window_detection() {
        let silent = WindowResult { text: String::new(), avg_logprob: -1.5, no_speech_prob: 0.9 };
        let confident = WindowResult { text: "hi".into(), avg_logprob: -0.2, no_speech_prob: 0.9 };
        assert!(silent.is_silent());
        assert!(!confident.is_silent());
    }
}
