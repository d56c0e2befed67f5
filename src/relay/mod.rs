//! Stream relay: one recorder in, any number of listeners out

pub mod handlers;
pub mod server;
pub mod session;
pub mod websocket;

pub use server::{AppState, RelayServer};
pub use session::{SessionRegistry, StreamSession, Subscription};
