//! Error types for the relay pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input device errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture thread did not report startup")]
    StartupTimeout,
}

/// Output device errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Playback thread did not report startup")]
    StartupTimeout,
}

/// Frame parsing errors. Always recoverable: the offending message is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Expected chunk tag {expected:?}, found {found:?}")]
    InvalidTag { expected: &'static str, found: [u8; 4] },

    #[error("Unsupported format tag {0}")]
    UnsupportedFormat(u16),

    #[error("Unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),

    #[error("Declared payload length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Inconsistent header: {0}")]
    InconsistentHeader(String),

    #[error("Sample payload of {0} bytes is not a whole number of samples")]
    MisalignedPayload(usize),
}

/// Channel errors between clients and the relay
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid connect request: {0}")]
    InvalidRequest(String),

    #[error("Channel closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::ConnectionFailed(err.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
