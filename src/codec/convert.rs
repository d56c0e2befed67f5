//! Float to 16-bit PCM conversion
//!
//! Samples are clipped to [-1.0, 1.0] and scaled asymmetrically: negative
//! values by 32768, non-negative values by 32767, so both ends of the i16
//! range are reachable without overflow. The scaled value is rounded half
//! away from zero. NaN converts to 0.

use crate::audio::block::{PcmBlock, SampleBlock};

/// Scale applied to non-negative samples
pub const POSITIVE_SCALE: f32 = 32767.0;

/// Scale applied to negative samples
pub const NEGATIVE_SCALE: f32 = 32768.0;

/// Convert one normalized sample to i16
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }

    let clipped = sample.clamp(-1.0, 1.0);
    let scaled = if clipped < 0.0 {
        clipped * NEGATIVE_SCALE
    } else {
        clipped * POSITIVE_SCALE
    };

    // In range after clipping; `as` saturates anyway.
    scaled.round() as i16
}

/// Inverse of [`sample_to_i16`] for playback
#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    if value < 0 {
        value as f32 / NEGATIVE_SCALE
    } else {
        value as f32 / POSITIVE_SCALE
    }
}

/// Stateless block converter
pub struct SampleConverter;

impl SampleConverter {
    /// Convert a captured block, consuming it
    pub fn convert(block: SampleBlock) -> PcmBlock {
        PcmBlock::new(Self::convert_slice(&block.samples), block.sample_rate)
    }

    pub fn convert_slice(samples: &[f32]) -> Vec<i16> {
        samples.iter().map(|&s| sample_to_i16(s)).collect()
    }

    /// Back to normalized floats
    pub fn to_f32(samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|&v| i16_to_sample(v)).collect()
    }
}
