//! WAV frame decoder
//!
//! Frames come from the network and are untrusted: every header field is
//! checked before the payload is touched. A bad frame is rejected on its own;
//! nothing carries over to the next one.

use bytes::Buf;

use crate::audio::playback::PlaybackSink;
use crate::codec::convert::SampleConverter;
use crate::codec::encoder::{WavFormat, FMT_CHUNK_LEN, FORMAT_PCM, HEADER_LEN};
use crate::error::DecodeError;

/// Samples recovered from one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub format: WavFormat,
    /// Interleaved PCM samples
    pub samples: Vec<i16>,
}

impl DecodedBlock {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// Normalized interleaved samples for the output device
    pub fn to_f32(&self) -> Vec<f32> {
        SampleConverter::to_f32(&self.samples)
    }
}

fn read_tag(buf: &mut &[u8], expected: &'static str) -> Result<(), DecodeError> {
    let mut found = [0u8; 4];
    buf.copy_to_slice(&mut found);
    if &found != expected.as_bytes() {
        return Err(DecodeError::InvalidTag { expected, found });
    }
    Ok(())
}

/// Parse exactly one AudioFrame
pub fn parse_frame(data: &[u8]) -> Result<DecodedBlock, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut buf = data;

    read_tag(&mut buf, "RIFF")?;
    let riff_len = buf.get_u32_le() as usize;
    read_tag(&mut buf, "WAVE")?;

    read_tag(&mut buf, "fmt ")?;
    let fmt_len = buf.get_u32_le();
    if fmt_len != FMT_CHUNK_LEN {
        return Err(DecodeError::InconsistentHeader(format!("fmt chunk length {}", fmt_len)));
    }

    let format_tag = buf.get_u16_le();
    let channels = buf.get_u16_le();
    let sample_rate = buf.get_u32_le();
    let byte_rate = buf.get_u32_le();
    let block_align = buf.get_u16_le();
    let bits_per_sample = buf.get_u16_le();

    if format_tag != FORMAT_PCM {
        return Err(DecodeError::UnsupportedFormat(format_tag));
    }
    if bits_per_sample != 16 {
        return Err(DecodeError::UnsupportedBitDepth(bits_per_sample));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(DecodeError::InconsistentHeader(format!(
            "{} channels at {} Hz",
            channels, sample_rate
        )));
    }

    let format = WavFormat::new(channels, sample_rate, bits_per_sample);
    let expected = format.checked_block_align().zip(format.checked_byte_rate());
    if expected != Some((block_align, byte_rate)) {
        return Err(DecodeError::InconsistentHeader(format!(
            "block align {} / byte rate {} for {:?}",
            block_align, byte_rate, format
        )));
    }

    read_tag(&mut buf, "data")?;
    let data_len = buf.get_u32_le() as usize;

    if data_len != buf.remaining() {
        return Err(DecodeError::LengthMismatch {
            declared: data_len,
            actual: buf.remaining(),
        });
    }
    if riff_len != data.len() - 8 {
        return Err(DecodeError::InconsistentHeader(format!(
            "RIFF length {} for {} byte frame",
            riff_len,
            data.len()
        )));
    }
    if data_len % block_align as usize != 0 {
        return Err(DecodeError::MisalignedPayload(data_len));
    }

    let samples = buf
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    Ok(DecodedBlock { format, samples })
}

/// Listener-side decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No valid frame seen yet
    Idle,
    Playing,
}

/// Decodes inbound frames and hands them to a playback sink
pub struct PlaybackDecoder {
    state: DecoderState,
    frames_decoded: u64,
    frames_rejected: u64,
    samples_produced: u64,
}

impl PlaybackDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            frames_decoded: 0,
            frames_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Decode one binary message and schedule it for playback.
    ///
    /// A malformed frame is counted and returned as an error; the caller is
    /// expected to log it and carry on with the next message.
    pub fn handle_frame(&mut self, data: &[u8], sink: &dyn PlaybackSink) -> Result<(), DecodeError> {
        let block = match parse_frame(data) {
            Ok(block) => block,
            Err(e) => {
                self.frames_rejected += 1;
                return Err(e);
            }
        };

        if self.state == DecoderState::Idle {
            tracing::info!(
                "First frame: {} Hz, {} channel(s), {} samples",
                block.format.sample_rate,
                block.format.channels,
                block.samples.len()
            );
            self.state = DecoderState::Playing;
        }

        self.frames_decoded += 1;
        self.samples_produced += block.samples.len() as u64;
        sink.play(block);
        Ok(())
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

impl Default for PlaybackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::block::SampleBlock;
    use crate::audio::playback::CollectingSink;
    use crate::codec::{FrameEncoder, SampleConverter};
    use proptest::prelude::*;

    #[test]
    fn test_reference_scenario() {
        let block = SampleBlock::new(vec![0.5, -1.0, 0.0, 1.0], 48000, 0);
        let pcm = SampleConverter::convert(block);
        let frame = FrameEncoder::default().encode_block(&pcm);
        assert_eq!(frame.len(), 52);

        let decoded = parse_frame(frame.as_bytes()).unwrap();
        assert_eq!(decoded.samples, vec![16384, -32768, 0, 32767]);
        assert_eq!(decoded.format, WavFormat::mono16(48000));
        assert_eq!(decoded.frames(), 4);
    }

    #[test]
    fn test_empty_frame_accepted() {
        let frame = FrameEncoder::default().encode(&[]);
        let decoded = parse_frame(frame.as_bytes()).unwrap();
        assert!(decoded.samples.is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let frame = FrameEncoder::default().encode(&[1, 2, 3, 4]);
        let bytes = frame.as_bytes();
        let err = parse_frame(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err, DecodeError::LengthMismatch { declared: 8, actual: 7 });
    }

    #[test]
    fn test_short_header() {
        let err = parse_frame(b"RIFF").unwrap_err();
        assert_eq!(err, DecodeError::Truncated { needed: 44, actual: 4 });
    }

    #[test]
    fn test_bad_tags_and_fields() {
        let frame = FrameEncoder::default().encode(&[1, 2]);

        let mut bad = frame.as_bytes().to_vec();
        bad[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(parse_frame(&bad), Err(DecodeError::InvalidTag { expected: "WAVE", .. })));

        let mut bad = frame.as_bytes().to_vec();
        bad[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(parse_frame(&bad), Err(DecodeError::UnsupportedFormat(3)));

        let mut bad = frame.as_bytes().to_vec();
        bad[34..36].copy_from_slice(&24u16.to_le_bytes());
        assert_eq!(parse_frame(&bad), Err(DecodeError::UnsupportedBitDepth(24)));

        let mut bad = frame.as_bytes().to_vec();
        bad[28..32].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(parse_frame(&bad), Err(DecodeError::InconsistentHeader(_))));

        let mut bad = frame.as_bytes().to_vec();
        bad[4..8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(parse_frame(&bad), Err(DecodeError::InconsistentHeader(_))));
    }

    #[test]
    fn test_oversized_header_fields_rejected() {
        let frame = FrameEncoder::default().encode(&[1, 2]);

        let mut bad = frame.as_bytes().to_vec();
        bad[22..24].copy_from_slice(&40000u16.to_le_bytes());
        assert!(matches!(parse_frame(&bad), Err(DecodeError::InconsistentHeader(_))));

        let mut bad = frame.as_bytes().to_vec();
        bad[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(parse_frame(&bad), Err(DecodeError::InconsistentHeader(_))));

        let mut bad = frame.as_bytes().to_vec();
        bad[22..24].copy_from_slice(&40000u16.to_le_bytes());
        bad[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        let sink = CollectingSink::new();
        let mut decoder = PlaybackDecoder::new();
        assert!(decoder.handle_frame(&bad, &sink).is_err());
        assert!(decoder.handle_frame(frame.as_bytes(), &sink).is_ok());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_bad_frame_does_not_disturb_later_frames() {
        let encoder = FrameEncoder::default();
        let sink = CollectingSink::new();
        let mut decoder = PlaybackDecoder::new();
        assert_eq!(decoder.state(), DecoderState::Idle);

        let first = encoder.encode(&[1, 2]);
        let broken = encoder.encode(&[3, 4]);
        let last = encoder.encode(&[5, 6]);
        let truncated = &broken.as_bytes()[..broken.len() - 1];

        assert!(decoder.handle_frame(first.as_bytes(), &sink).is_ok());
        assert!(decoder.handle_frame(truncated, &sink).is_err());
        assert!(decoder.handle_frame(last.as_bytes(), &sink).is_ok());

        let played: Vec<Vec<i16>> = sink.blocks().into_iter().map(|b| b.samples).collect();
        assert_eq!(played, vec![vec![1, 2], vec![5, 6]]);

        let stats = decoder.stats();
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.samples_produced, 4);
        assert_eq!(decoder.state(), DecoderState::Playing);
    }

    #[test]
    fn test_rejected_first_frame_stays_idle() {
        let sink = CollectingSink::new();
        let mut decoder = PlaybackDecoder::new();
        assert!(decoder.handle_frame(b"garbage", &sink).is_err());
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert!(sink.blocks().is_empty());
    }

    proptest! {
        #[test]
        fn prop_payload_round_trip(samples in proptest::collection::vec(any::<i16>(), 0..2048)) {
            let frame = FrameEncoder::default().encode(&samples);
            prop_assert_eq!(frame.len(), HEADER_LEN + samples.len() * 2);
            let decoded = parse_frame(frame.as_bytes()).unwrap();
            prop_assert_eq!(decoded.samples, samples);
        }

        #[test]
        fn prop_float_pipeline(samples in proptest::collection::vec(-1.5f32..1.5, 0..256)) {
            let pcm = SampleConverter::convert_slice(&samples);
            let frame = FrameEncoder::default().encode(&pcm);
            let decoded = parse_frame(frame.as_bytes()).unwrap();
            for (s, v) in samples.iter().zip(decoded.samples) {
                let clipped = s.clamp(-1.0, 1.0) as f64;
                let scale = if clipped < 0.0 { 32768.0 } else { 32767.0 };
                prop_assert!((v as f64 - (clipped * scale).round()).abs() <= 1.0);
            }
        }
    }
}
