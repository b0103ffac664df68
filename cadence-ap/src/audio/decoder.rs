//! Audio decoder using symphonia
//!
//! Decodes a whole in-memory stream to interleaved stereo f32. Whether a
//! failure means "this format cannot be decoded here" or "this stream is
//! broken" matters to the caller: the first is a candidate for transcoding.

use super::CHANNELS;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a stream could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Container or codec not supported by the enabled decoders
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    /// Supported format, but the data is unusable
    #[error("Corrupt stream: {0}")]
    Corrupt(String),
}

/// Decoded PCM
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved stereo samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Decode an entire stream.
    ///
    /// `extension` is only a hint for the format probe.
    pub fn decode_bytes(
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<DecodedAudio, DecodeFailure> {
        debug!("Decoding {} bytes (hint: {:?})", bytes.len(), extension);

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| classify("probe", e))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeFailure::Unsupported("No decodable audio track".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DecodeFailure::Corrupt("Sample rate not found".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| classify("codec", e))?;

        let mut samples = Vec::new();
        let mut decode_errors = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    push_stereo(buffer.samples(), spec.channels.count(), &mut samples);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    decode_errors += 1;
                    debug!("Skipping undecodable packet: {}", e);
                }
                Err(e) => {
                    warn!("Decoder failed: {}", e);
                    return Err(classify("decode", e));
                }
            }
        }

        if samples.is_empty() {
            return Err(DecodeFailure::Corrupt(format!(
                "No audio decoded ({} bad packets)",
                decode_errors
            )));
        }

        let audio = DecodedAudio {
            samples,
            sample_rate,
        };
        debug!(
            "Decoded {} frames at {}Hz ({:.1}s, {} bad packets)",
            audio.frames(),
            sample_rate,
            audio.duration_secs(),
            decode_errors
        );
        Ok(audio)
    }
}

fn classify(stage: &str, error: SymphoniaError) -> DecodeFailure {
    match error {
        SymphoniaError::Unsupported(what) => {
            DecodeFailure::Unsupported(format!("{}: {}", stage, what))
        }
        other => DecodeFailure::Corrupt(format!("{}: {}", stage, other)),
    }
}

/// Append interleaved samples of any channel count as stereo
fn push_stereo(interleaved: &[f32], channels: usize, output: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &sample in interleaved {
                output.push(sample);
                output.push(sample);
            }
        }
        _ => {
            // Extra channels are dropped
            for frame in interleaved.chunks_exact(channels) {
                output.push(frame[0]);
                output.push(frame[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16-bit PCM WAV with `frames` frames of a constant value
    fn wav(sample_rate: u32, channels: u16, frames: usize, value: i16) -> Vec<u8> {
        let data_len = frames * channels as usize * 2;
        let mut bytes = Vec::with_capacity(44 + data_len);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data_len as u32).to_le_bytes());
        for _ in 0..frames * channels as usize {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_mono_wav_to_stereo() {
        let audio = SimpleDecoder::decode_bytes(wav(8000, 1, 8000, 16384), Some("wav")).unwrap();

        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.frames(), 8000);
        assert!((audio.duration_secs() - 1.0).abs() < 1e-6);
        assert!((audio.samples[0] - 0.5).abs() < 0.01);
        assert_eq!(audio.samples[0], audio.samples[1]);
    }

    #[test]
    fn test_unknown_bytes_are_unsupported() {
        let result = SimpleDecoder::decode_bytes(b"definitely not audio".repeat(64), None);
        assert!(matches!(result, Err(DecodeFailure::Unsupported(_))));
    }

    #[test]
    fn test_push_stereo_drops_extra_channels() {
        let mut out = Vec::new();
        push_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }
}
