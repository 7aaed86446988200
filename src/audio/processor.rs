//! # Audio Decoding and Conversion
//!
//! Turns the bytes a client uploaded for one answer into what Whisper expects:
//! 16 kHz mono `f32` samples in `[-1.0, 1.0]`.
//!
//! ## Accepted input:
//! - **WAV** (`RIFF` header): 8/16/24-bit integer or 32-bit float, any channel count,
//!   any sample rate. Channels are averaged into mono.
//! - **Anything else**: treated as headerless 16-bit little-endian mono PCM at the
//!   configured fallback rate. A trailing odd byte is dropped.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use hound::{SampleFormat, WavReader};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::io::Cursor;
use tracing::debug;

/// Sample rate the Whisper models are trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode one uploaded recording into mono samples.
pub fn decode(bytes: &[u8], fallback_sample_rate: u32) -> Result<DecodedAudio> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        Ok(DecodedAudio {
            samples: pcm16_to_float(bytes),
            sample_rate: fallback_sample_rate,
        })
    }
}

/// Decode, downmix and resample in one step.
pub fn prepare_for_whisper(bytes: &[u8], fallback_sample_rate: u32) -> Result<Vec<f32>> {
    let decoded = decode(bytes, fallback_sample_rate)?;
    debug!(
        sample_rate = decoded.sample_rate,
        duration_secs = decoded.duration_secs(),
        "Audio decoded"
    );
    resample(&decoded.samples, decoded.sample_rate, TARGET_SAMPLE_RATE)
}

/// Parse a WAV container. Malformed or truncated input is an error, never a panic.
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(|e| anyhow!("Invalid WAV data: {}", e))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| anyhow!("Failed to read WAV samples: {}", e))?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| anyhow!("Failed to read WAV samples: {}", e))?
        }
        (format, bits) => {
            return Err(anyhow!("Unsupported WAV format: {:?} {}-bit", format, bits));
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels.max(1) as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Interpret bytes as 16-bit little-endian PCM.
pub fn pcm16_to_float(bytes: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    samples
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert mono samples between rates with band-limited sinc interpolation.
pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input.is_empty() || input_rate == output_rate {
        return Ok(input.to_vec());
    }
    if input_rate == 0 || output_rate == 0 {
        return Err(anyhow!("Sample rates must be greater than 0"));
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;

    let mut output = Vec::with_capacity((input.len() as f64 * ratio * 1.1) as usize);
    for chunk in input.chunks(RESAMPLE_CHUNK) {
        // SincFixedIn wants exactly RESAMPLE_CHUNK frames per call
        let mut block = vec![0.0f32; RESAMPLE_CHUNK];
        block[..chunk.len()].copy_from_slice(chunk);

        let processed = resampler
            .process(&[block], None)
            .map_err(|e| anyhow!("Resampling failed: {}", e))?;
        let produced = &processed[0];

        let take = if chunk.len() < RESAMPLE_CHUNK {
            ((chunk.len() as f64) * ratio).ceil() as usize
        } else {
            produced.len()
        };
        output.extend_from_slice(&produced[..take.min(produced.len())]);
    }

    debug!(input_rate, output_rate, input_frames = input.len(), output_frames = output.len(), "Audio resampled");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_raw_pcm_fallback() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x7F];
        let decoded = decode(&bytes, 44100).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.samples, vec![0.5, -0.5]);
    }

    #[test]
    fn test_empty_input_is_zero_samples() {
        let decoded = decode(&[], 44100).unwrap();
        assert!(decoded.samples.is_empty());
        assert!(prepare_for_whisper(&[], 44100).unwrap().is_empty());
    }

    #[test]
    fn test_wav_stereo_is_downmixed() {
        let bytes = wav_bytes(&[16384, 0, -16384, 0], 2, 16000);
        let decoded = decode(&bytes, 44100).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples, vec![0.25, -0.25]);
    }

    #[test]
    fn test_truncated_wav_is_an_error() {
        assert!(decode(b"RIFF\x10\x00\x00\x00WAVE", 44100).is_err());
        // Chunk header cut off after its id
        assert!(decode(b"RIFF\x24\x00\x00\x00WAVEfmt ", 44100).is_err());
        assert!(decode(b"RIFF\x24\x00\x00\x00WAVEfmt \x10\x00", 44100).is_err());
    }

    #[test]
    fn test_wav_with_cut_off_data_is_an_error() {
        let bytes = wav_bytes(&[1000, -1000, 2000, -2000], 1, 16000);
        // Drop the last byte so the final sample is incomplete
        assert!(decode(&bytes[..bytes.len() - 1], 44100).is_err());
    }

    #[test]
    fn test_wav_eight_bit_and_float() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(64i8).unwrap();
        writer.write_sample(-64i8).unwrap();
        writer.finalize().unwrap();
        let decoded = decode(&cursor.into_inner(), 44100).unwrap();
        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples, vec![0.5, -0.5]);

        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.25f32).unwrap();
        writer.finalize().unwrap();
        assert_eq!(decode(&cursor.into_inner(), 44100).unwrap().samples, vec![0.25]);
    }

    #[test]
    fn test_resample_length_follows_ratio() {
        let input: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let output = resample(&input, 44100, TARGET_SAMPLE_RATE).unwrap();
        let expected = 16000.0;
        let tolerance = expected * 0.02;
        assert!(
            (output.len() as f64 - expected).abs() < tolerance,
            "unexpected length {}",
            output.len()
        );
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16000, 16000).unwrap(), input);
    }
}
