//! # Transcription Module
//!
//! Speech-to-text with Whisper models running locally through candle, so no audio
//! leaves the host for recognition.
//!
//! ## Key Components:
//! - **model**: checkpoint download, mel spectrogram, beam search decoding
//! - **engine**: the `Transcriber` implementation wrapping the model
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, handles technical vocabulary well
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;

pub use engine::WhisperTranscriber;
