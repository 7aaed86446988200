//! Voice activity filtering with WebRTC VAD.
//!
//! The recording is cut into 30 ms frames. Frames classified as speech are kept
//! together with `padding` of context on each side; everything else is dropped.

use anyhow::{anyhow, Result};
use webrtc_vad::{SampleRate, Vad, VadMode};

use super::processor::TARGET_SAMPLE_RATE;

/// 30 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = (TARGET_SAMPLE_RATE as usize * 30) / 1000;

/// Context kept around detected speech.
pub const SPEECH_PADDING_MS: usize = 300;

/// Detector aggressiveness.
const VAD_MODE: VadMode = VadMode::Aggressive;

/// Return only the speech portions of 16 kHz mono audio.
///
/// An empty result means no speech was detected. `Vad` is not `Send`, so this must
/// run on the thread that calls it (the transcription worker does).
pub fn speech_only(samples: &[f32]) -> Result<Vec<f32>> {
    let flags = classify_frames(samples)?;
    let padding_frames = SPEECH_PADDING_MS.div_ceil(30);
    let keep = widen(&flags, padding_frames);

    let mut speech = Vec::new();
    for (index, frame) in samples.chunks(FRAME_SAMPLES).enumerate() {
        if keep.get(index).copied().unwrap_or(false) {
            speech.extend_from_slice(frame);
        }
    }
    Ok(speech)
}

/// Speech/non-speech decision per frame. A short final frame is zero-padded.
fn classify_frames(samples: &[f32]) -> Result<Vec<bool>> {
    let mut vad = Vad::new();
    vad.set_mode(VAD_MODE);
    vad.set_sample_rate(SampleRate::Rate16kHz);

    let mut flags = Vec::with_capacity(samples.len() / FRAME_SAMPLES + 1);
    let mut frame = vec![0i16; FRAME_SAMPLES];
    for chunk in samples.chunks(FRAME_SAMPLES) {
        frame.fill(0);
        for (slot, &sample) in frame.iter_mut().zip(chunk) {
            *slot = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        }
        let is_speech = vad
            .is_voice_segment(&frame)
            .map_err(|_| anyhow!("VAD rejected a {}-sample frame", FRAME_SAMPLES))?;
        flags.push(is_speech);
    }
    Ok(flags)
}

/// Mark every frame within `radius` frames of a speech frame.
fn widen(flags: &[bool], radius: usize) -> Vec<bool> {
    let mut keep = vec![false; flags.len()];
    for (index, &speech) in flags.iter().enumerate() {
        if !speech {
            continue;
        }
        let start = index.saturating_sub(radius);
        let end = (index + radius + 1).min(flags.len());
        keep[start..end].iter_mut().for_each(|k| *k = true);
    }
    keep
}
