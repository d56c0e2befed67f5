//! PCM conversion and WAV framing
//!
//! Float samples become clipped 16-bit PCM, and each PCM block is wrapped in
//! its own WAV header so frames decode independently.

pub mod convert;
pub mod decoder;
pub mod encoder;

pub use convert::SampleConverter;
pub use decoder::{parse_frame, DecodedBlock, DecoderState, PlaybackDecoder};
pub use encoder::{AudioFrame, FrameEncoder, WavFormat};
