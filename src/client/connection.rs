//! WebSocket connection to the relay
//!
//! The socket is split into a read task and a write task. Outgoing audio goes
//! through a bounded queue: when it is full the caller drops the block
//! instead of waiting, so latency stays bounded.

use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::protocol::{ConnectMode, ControlMessage, StreamId};

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the relay to acknowledge
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Message received from the relay
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Control(ControlMessage),
    /// Text that is not a known control message
    Text(String),
    Binary(Bytes),
    /// The socket failed; no further messages follow
    Error(String),
}

/// Offer a message to a bounded queue: `Ok(false)` when full, never waits
pub(crate) fn try_enqueue(queue: &mpsc::Sender<Bytes>, data: Bytes) -> Result<bool, TransportError> {
    match queue.try_send(data) {
        Ok(()) => Ok(true),
        Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
    }
}

/// Client side of a relay channel
pub struct RelayConnection {
    outgoing_tx: mpsc::Sender<Bytes>,
    incoming_rx: mpsc::Receiver<Incoming>,
    close_tx: Option<oneshot::Sender<()>>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl RelayConnection {
    /// Connect to the relay in the given role
    pub async fn connect(relay_url: &str, mode: &ConnectMode, queue_len: usize) -> Result<Self, TransportError> {
        let url = mode.connect_url(relay_url)?;
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", url, e)))?;

        let (ws_writer, ws_reader) = ws_stream.split();
        let queue_len = queue_len.max(1);

        let (outgoing_tx, outgoing_rx) = mpsc::channel(queue_len);
        let (incoming_tx, incoming_rx) = mpsc::channel(queue_len);
        let (close_tx, close_rx) = oneshot::channel();

        let write_handle = tokio::spawn(Self::write_task(outgoing_rx, close_rx, ws_writer));
        let read_handle = tokio::spawn(Self::read_task(ws_reader, incoming_tx));

        Ok(Self {
            outgoing_tx,
            incoming_rx,
            close_tx: Some(close_tx),
            read_handle,
            write_handle,
        })
    }

    /// Queue a binary message without waiting.
    ///
    /// Returns `Ok(false)` when the queue is full and the message was dropped.
    pub fn try_send_binary(&self, data: Bytes) -> Result<bool, TransportError> {
        try_enqueue(&self.outgoing_tx, data)
    }

    pub(crate) fn outgoing(&self) -> &mpsc::Sender<Bytes> {
        &self.outgoing_tx
    }

    /// Next message from the relay, `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<Incoming> {
        self.incoming_rx.recv().await
    }

    /// Wait for `RECORD_START:<id>` after connecting with `mode=record`
    pub async fn wait_for_record_start(&mut self, timeout: Duration) -> Result<StreamId, TransportError> {
        let handshake = async {
            loop {
                match self.recv().await {
                    Some(Incoming::Control(ControlMessage::RecordStart(id))) => return Ok(id),
                    Some(Incoming::Control(ControlMessage::Error(reason))) => {
                        return Err(TransportError::Handshake(reason))
                    }
                    Some(Incoming::Error(reason)) => return Err(TransportError::ConnectionFailed(reason)),
                    Some(other) => tracing::debug!("Ignoring message before RECORD_START: {:?}", other),
                    None => return Err(TransportError::Closed),
                }
            }
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Send a close frame and shut both tasks down
    pub async fn close(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        let _ = self.write_handle.await;

        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.read_handle).await.is_err() {
            self.read_handle.abort();
        }
    }

    async fn write_task(
        mut outgoing_rx: mpsc::Receiver<Bytes>,
        mut close_rx: oneshot::Receiver<()>,
        mut ws_writer: SplitSink<WebSocket, Message>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut close_rx => break,
                data = outgoing_rx.recv() => match data {
                    Some(data) => {
                        if let Err(e) = ws_writer.send(Message::Binary(data.to_vec())).await {
                            tracing::warn!("Failed to send message: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let _ = ws_writer.close().await;
    }

    async fn read_task(mut ws_reader: SplitStream<WebSocket>, incoming_tx: mpsc::Sender<Incoming>) {
        while let Some(msg) = ws_reader.next().await {
            let incoming = match msg {
                Ok(Message::Binary(data)) => Incoming::Binary(Bytes::from(data)),
                Ok(Message::Text(text)) => match ControlMessage::parse(&text) {
                    Some(control) => Incoming::Control(control),
                    None => Incoming::Text(text),
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Relay closed the connection: {:?}", frame);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    let _ = incoming_tx.send(Incoming::Error(e.to_string())).await;
                    break;
                }
            };

            if incoming_tx.send(incoming).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);

        assert!(try_enqueue(&tx, Bytes::from_static(b"first")).unwrap());
        assert!(!try_enqueue(&tx, Bytes::from_static(b"second")).unwrap());

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"first"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            try_enqueue(&tx, Bytes::from_static(b"third")),
            Err(TransportError::Closed)
        ));
    }
}
