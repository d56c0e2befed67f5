//! Relay wire protocol
//!
//! Connections are WebSocket upgrades whose query string selects the role:
//!
//! - `?mode=record`: producer. The relay answers with `RECORD_START:<id>`
//!   and then expects one binary message per sample block (f32 little-endian).
//! - `?mode=listen&stream_id=<id>`: consumer. Receives one binary message
//!   per AudioFrame, or `ERROR:<reason>` when the stream does not exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

const RECORD_START_PREFIX: &str = "RECORD_START:";
const ERROR_PREFIX: &str = "ERROR:";

/// Opaque token binding one producer to its listeners
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Fresh random identifier (32 lowercase hex characters)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::InvalidRequest("empty stream id".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(TransportError::InvalidRequest(format!("invalid stream id: {}", s)));
        }
        Ok(Self(s.to_string()))
    }
}

/// Role requested by a connecting client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    Record,
    Listen { stream_id: StreamId },
}

/// Raw query parameters of a connect request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    pub mode: Option<String>,
    pub stream_id: Option<String>,
}

impl TryFrom<ConnectParams> for ConnectMode {
    type Error = TransportError;

    fn try_from(params: ConnectParams) -> Result<Self, Self::Error> {
        match params.mode.as_deref() {
            Some("record") => Ok(ConnectMode::Record),
            Some("listen") => {
                let stream_id = params
                    .stream_id
                    .ok_or_else(|| TransportError::InvalidRequest("missing stream_id".to_string()))?
                    .parse()?;
                Ok(ConnectMode::Listen { stream_id })
            }
            Some(other) => Err(TransportError::InvalidRequest(format!("unknown mode: {}", other))),
            None => Err(TransportError::InvalidRequest("missing mode".to_string())),
        }
    }
}

impl ConnectMode {
    /// Build the connect URL for this mode on top of the relay base URL
    pub fn connect_url(&self, relay_url: &str) -> Result<url::Url, TransportError> {
        let mut url = url::Url::parse(relay_url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", relay_url, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            match self {
                ConnectMode::Record => {
                    pairs.append_pair("mode", "record");
                }
                ConnectMode::Listen { stream_id } => {
                    pairs.append_pair("mode", "listen");
                    pairs.append_pair("stream_id", stream_id.as_str());
                }
            }
        }

        Ok(url)
    }
}

/// Text messages interleaved with binary audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Relay → recorder, sent once right after the connection is accepted
    RecordStart(StreamId),
    /// Relay → client, sent before the relay closes a rejected connection
    Error(String),
}

impl ControlMessage {
    pub fn to_text(&self) -> String {
        match self {
            ControlMessage::RecordStart(id) => format!("{}{}", RECORD_START_PREFIX, id),
            ControlMessage::Error(reason) => format!("{}{}", ERROR_PREFIX, reason),
        }
    }

    /// Parse a text message. Unknown text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(id) = text.strip_prefix(RECORD_START_PREFIX) {
            id.parse().ok().map(ControlMessage::RecordStart)
        } else {
            text.strip_prefix(ERROR_PREFIX)
                .map(|reason| ControlMessage::Error(reason.to_string()))
        }
    }
}

/// Snapshot of a live stream, as reported by the relay API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub created_at: DateTime<Utc>,
    pub listeners: usize,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = StreamId::generate();
        let b = StreamId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().parse::<StreamId>().is_ok());
    }

    #[test]
    fn test_stream_id_rejects_garbage() {
        assert!("".parse::<StreamId>().is_err());
        assert!("abc&mode=record".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_connect_params() {
        let record = ConnectParams { mode: Some("record".into()), stream_id: None };
        assert_eq!(ConnectMode::try_from(record).unwrap(), ConnectMode::Record);

        let listen = ConnectParams { mode: Some("listen".into()), stream_id: Some("abc123".into()) };
        assert_eq!(
            ConnectMode::try_from(listen).unwrap(),
            ConnectMode::Listen { stream_id: "abc123".parse().unwrap() }
        );

        let missing = ConnectParams { mode: Some("listen".into()), stream_id: None };
        assert!(ConnectMode::try_from(missing).is_err());

        let unknown = ConnectParams { mode: Some("mix".into()), stream_id: None };
        assert!(ConnectMode::try_from(unknown).is_err());

        assert!(ConnectMode::try_from(ConnectParams::default()).is_err());
    }

    #[test]
    fn test_connect_url() {
        let url = ConnectMode::Record.connect_url("ws://localhost:8765/").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8765/?mode=record");

        let mode = ConnectMode::Listen { stream_id: "abc".parse().unwrap() };
        let url = mode.connect_url("ws://localhost:8765/?stale=1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8765/?mode=listen&stream_id=abc");

        assert!(ConnectMode::Record.connect_url("not a url").is_err());
    }

    #[test]
    fn test_control_messages() {
        let id: StreamId = "f00d".parse().unwrap();
        let start = ControlMessage::RecordStart(id.clone());
        assert_eq!(start.to_text(), "RECORD_START:f00d");
        assert_eq!(ControlMessage::parse("RECORD_START:f00d"), Some(start));

        assert_eq!(
            ControlMessage::parse("ERROR:unknown stream"),
            Some(ControlMessage::Error("unknown stream".into()))
        );
        assert_eq!(ControlMessage::parse("RECORD_START:"), None);
        assert_eq!(ControlMessage::parse("hello"), None);
    }
}
