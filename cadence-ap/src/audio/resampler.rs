//! Audio resampling using rubato
//!
//! Converts decoded stereo audio to the sample rate of the output device.

use super::CHANNELS;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

pub struct Resampler;

impl Resampler {
    /// Resample interleaved stereo from `input_rate` to `output_rate`.
    ///
    /// Returns a copy when the rates already match.
    pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
        if input_rate == output_rate || input.is_empty() {
            return Ok(input.to_vec());
        }
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::Decode(format!(
                "Cannot resample {}Hz -> {}Hz",
                input_rate, output_rate
            )));
        }

        debug!("Resampling from {}Hz to {}Hz", input_rate, output_rate);

        let planar_input = Self::deinterleave(input);
        let input_frames = planar_input[0].len();

        // Whole buffer as one chunk
        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            input_frames,
            CHANNELS,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let output = Self::interleave(planar_output);
        debug!(
            "Resampled {} input frames to {} output frames",
            input_frames,
            output.len() / CHANNELS
        );
        Ok(output)
    }

    /// `[L, R, L, R, ...]` -> `[[L, L, ...], [R, R, ...]]`
    fn deinterleave(samples: &[f32]) -> Vec<Vec<f32>> {
        let frames = samples.len() / CHANNELS;
        let mut planar = vec![Vec::with_capacity(frames); CHANNELS];
        for frame in samples.chunks_exact(CHANNELS) {
            for (channel, sample) in planar.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        planar
    }

    fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
        let Some(first) = planar.first() else {
            return Vec::new();
        };
        let frames = first.len();
        let mut interleaved = Vec::with_capacity(frames * planar.len());
        for frame in 0..frames {
            for channel in &planar {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }
}
