//! # Mic Relay
//!
//! Live microphone relay: one recorder publishes a stream, any number of
//! listeners play it back through a WebSocket relay.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          RECORDER            │
//! │  ┌────────────┐              │
//! │  │ Microphone │ cpal thread  │
//! │  └─────┬──────┘              │
//! │        ▼  SampleBlock (f32)  │
//! │  ┌────────────────────────┐  │
//! │  │ Publisher (re-chunk to │  │
//! │  │ 1024-sample blocks)    │  │
//! │  └─────┬──────────────────┘  │
//! └────────┼─────────────────────┘
//!          │ ws  ?mode=record        raw f32 LE, one block per message
//!          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           RELAY                              │
//! │  RECORD_START:<id> ──► recorder                              │
//! │  ┌─────────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ SampleConverter │──►│ FrameEncoder │──►│ StreamSession │  │
//! │  │  f32 → i16      │   │  WAV header  │   │  fan-out      │  │
//! │  └─────────────────┘   └──────────────┘   └──┬─────────┬──┘  │
//! └──────────────────────────────────────────────┼─────────┼─────┘
//!          ws  ?mode=listen&stream_id=<id>       │         │
//!                                                ▼         ▼
//! ┌─────────────────────────────────────┐     (more listeners)
//! │              LISTENER               │
//! │  ┌──────────────────┐  ┌────────┐   │
//! │  │ PlaybackDecoder  │─►│ cpal   │   │
//! │  │ parse AudioFrame │  │ output │   │
//! │  └──────────────────┘  └────────┘   │
//! └─────────────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of captured and relayed audio
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Relayed audio is mono
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Bit depth of relayed PCM
    pub const BITS_PER_SAMPLE: u16 = 16;

    /// Samples per block sent by the recorder
    pub const DEFAULT_BLOCK_SIZE: usize = 1024;

    /// Default relay WebSocket port
    pub const DEFAULT_RELAY_PORT: u16 = 8765;

    /// Frames buffered per listener before the relay starts dropping
    pub const DEFAULT_LISTENER_QUEUE: usize = 64;

    /// Outgoing messages buffered per client connection
    pub const DEFAULT_SEND_QUEUE: usize = 32;

    /// Capture blocks buffered between the device thread and the publisher
    pub const DEFAULT_CAPTURE_QUEUE: usize = 64;

    /// Decoded chunks buffered ahead of the output device
    pub const DEFAULT_PLAYBACK_QUEUE: usize = 128;
}
