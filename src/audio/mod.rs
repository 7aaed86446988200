//! # Audio Processing Module
//!
//! Prepares an uploaded answer for speech recognition.
//!
//! ## Key Components:
//! - **processor**: WAV / raw PCM decoding, downmixing, resampling to 16 kHz
//! - **vad**: WebRTC voice activity filtering
//!
//! Client audio is never inspected while it is being received; the socket only
//! appends bytes. Everything here runs once per turn, on the transcription worker.

pub mod processor;
pub mod vad;
