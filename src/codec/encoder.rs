//! WAV frame encoder
//!
//! Every PCM block is wrapped in its own canonical 44-byte RIFF/WAVE header,
//! so a listener can decode any frame without having seen the ones before it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::block::PcmBlock;
use crate::constants::{BITS_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Size of the RIFF + fmt + data chunk headers
pub const HEADER_LEN: usize = 44;

/// WAVE_FORMAT_PCM
pub const FORMAT_PCM: u16 = 1;

/// Length of a plain PCM `fmt ` chunk body
pub const FMT_CHUNK_LEN: u32 = 16;

/// Codec parameters declared in a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
        }
    }

    /// Mono 16-bit at the given rate
    pub fn mono16(sample_rate: u32) -> Self {
        Self::new(1, sample_rate, BITS_PER_SAMPLE)
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// `block_align`, or `None` when the declared fields overflow it
    pub fn checked_block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.bytes_per_sample())
    }

    /// `byte_rate`, or `None` when the declared fields overflow it
    pub fn checked_byte_rate(&self) -> Option<u32> {
        self.checked_block_align()
            .and_then(|align| self.sample_rate.checked_mul(u32::from(align)))
    }
}

impl Default for WavFormat {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, BITS_PER_SAMPLE)
    }
}

/// One self-contained encoded frame: header followed by PCM payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Bytes,
}

impl AudioFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }
}

/// Stateless PCM → [`AudioFrame`] encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    format: WavFormat,
}

impl FrameEncoder {
    pub fn new(format: WavFormat) -> Self {
        Self { format }
    }

    /// Encode a block, declaring the block's own sample rate
    pub fn encode_block(&self, block: &PcmBlock) -> AudioFrame {
        let format = WavFormat {
            sample_rate: block.sample_rate,
            ..self.format
        };
        Self::encode_with(format, &block.samples)
    }

    /// Encode interleaved samples with this encoder's format
    pub fn encode(&self, samples: &[i16]) -> AudioFrame {
        Self::encode_with(self.format, samples)
    }

    fn encode_with(format: WavFormat, samples: &[i16]) -> AudioFrame {
        let data_len = samples.len() * format.bytes_per_sample() as usize;
        debug_assert!(data_len <= (u32::MAX as usize) - HEADER_LEN);
        let data_len = data_len as u32;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + data_len as usize);

        buf.put_slice(b"RIFF");
        buf.put_u32_le(36 + data_len);
        buf.put_slice(b"WAVE");

        buf.put_slice(b"fmt ");
        buf.put_u32_le(FMT_CHUNK_LEN);
        buf.put_u16_le(FORMAT_PCM);
        buf.put_u16_le(format.channels);
        buf.put_u32_le(format.sample_rate);
        buf.put_u32_le(format.byte_rate());
        buf.put_u16_le(format.block_align());
        buf.put_u16_le(format.bits_per_sample);

        buf.put_slice(b"data");
        buf.put_u32_le(data_len);

        for &sample in samples {
            buf.put_i16_le(sample);
        }

        AudioFrame { bytes: buf.freeze() }
    }
}
