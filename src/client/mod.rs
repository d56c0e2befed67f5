//! Recorder and listener clients

pub mod connection;
pub mod listener;
pub mod recorder;

pub use connection::{Incoming, RelayConnection};
pub use listener::ListenSession;
pub use recorder::{PublishStats, RecordSession};
