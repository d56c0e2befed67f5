//! Application configuration
//!
//! Loaded from TOML. Every section falls back to defaults, so a partial
//! file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration shared by the relay, recorder and listener binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub client: ClientConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Frames queued per listener before new frames are dropped for it
    pub listener_queue_frames: usize,
    /// Sample rate declared in the frames the relay encodes.
    ///
    /// Recorders send bare samples, so this must equal their
    /// `capture.sample_rate`; frames from a recorder at another rate are
    /// mislabeled and play at the wrong speed.
    pub sample_rate: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            listener_queue_frames: DEFAULT_LISTENER_QUEUE,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl RelayConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Settings for recorder and listener connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Outgoing messages queued before blocks are dropped
    pub send_queue_frames: usize,
    /// How long the recorder waits for `RECORD_START`
    pub handshake_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://localhost:{}/", DEFAULT_RELAY_PORT),
            send_queue_frames: DEFAULT_SEND_QUEUE,
            handshake_timeout_ms: 5000,
        }
    }
}

/// Input device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device id as reported by `list_devices`; `None` uses the system default
    pub device_id: Option<String>,
    /// Must match the relay's `relay.sample_rate`
    pub sample_rate: u32,
    /// Samples per block published to the relay
    pub block_size: usize,
    /// cpal buffer size hint; `None` keeps the device default
    pub buffer_size: Option<u32>,
    pub queue_blocks: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_size: None,
            queue_blocks: DEFAULT_CAPTURE_QUEUE,
        }
    }
}

/// Output device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device_id: Option<String>,
    pub sample_rate: u32,
    pub queue_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            queue_frames: DEFAULT_PLAYBACK_QUEUE,
        }
    }
}

impl AppConfig {
    /// Default config file location, e.g. `~/.config/mic-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mic-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path` if given, otherwise from the default location.
    /// A missing default file yields the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `(capture, relay)` rates when the recorder would capture at a rate
    /// other than the one the relay declares in its frames
    pub fn rate_mismatch(&self) -> Option<(u32, u32)> {
        (self.capture.sample_rate != self.relay.sample_rate)
            .then_some((self.capture.sample_rate, self.relay.sample_rate))
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
