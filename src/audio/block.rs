//! Sample blocks exchanged between capture, relay and codec

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::error::DecodeError;

/// Normalized mono samples from one capture callback
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Capture sequence number
    pub sequence: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u32) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wire form sent by the recorder: f32 little-endian, back to back
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.samples.len() * 4);
        for &sample in &self.samples {
            buf.put_f32_le(sample);
        }
        buf.freeze()
    }

    /// Parse the recorder wire form. The payload must hold whole samples.
    pub fn from_le_bytes(data: &[u8], sample_rate: u32, sequence: u32) -> Result<Self, DecodeError> {
        if data.len() % 4 != 0 {
            return Err(DecodeError::MisalignedPayload(data.len()));
        }

        let samples = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self::new(samples, sample_rate, sequence))
    }
}

/// Signed 16-bit mono PCM, same length and rate as its source block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmBlock {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i16>> for PcmBlock {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples, DEFAULT_SAMPLE_RATE)
    }
}
