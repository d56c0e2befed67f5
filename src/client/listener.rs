//! Listener session: relay → playback

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::audio::playback::PlaybackSink;
use crate::client::connection::{Incoming, RelayConnection};
use crate::codec::decoder::{DecoderStats, PlaybackDecoder};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::protocol::{ConnectMode, ControlMessage, StreamId};

/// A subscription to one stream, feeding a playback sink
pub struct ListenSession {
    stream_id: StreamId,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<DecoderStats, TransportError>>>,
}

impl ListenSession {
    /// Connect with `mode=listen&stream_id=<id>` and start decoding
    pub async fn start(
        client: &ClientConfig,
        stream_id: StreamId,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<Self, TransportError> {
        let mode = ConnectMode::Listen {
            stream_id: stream_id.clone(),
        };
        let connection = RelayConnection::connect(&client.relay_url, &mode, client.send_queue_frames).await?;

        tracing::info!("Listening to stream {}", stream_id);

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(listen(connection, sink, stop_rx));

        Ok(Self {
            stream_id,
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Wait until the relay ends the stream or the channel fails
    pub async fn finished(&mut self) -> Result<DecoderStats, TransportError> {
        match self.task.take() {
            Some(handle) => handle
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?,
            None => Ok(DecoderStats::default()),
        }
    }

    pub async fn stop(mut self) -> Result<DecoderStats, TransportError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.finished().await
    }
}

async fn listen(
    mut connection: RelayConnection,
    sink: Arc<dyn PlaybackSink>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<DecoderStats, TransportError> {
    let mut decoder = PlaybackDecoder::new();

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break Ok(()),
            incoming = connection.recv() => match incoming {
                Some(Incoming::Binary(data)) => {
                    if let Err(e) = decoder.handle_frame(&data, sink.as_ref()) {
                        tracing::warn!("Dropping frame: {}", e);
                    }
                }
                Some(Incoming::Control(ControlMessage::Error(reason))) => {
                    break Err(TransportError::Handshake(reason));
                }
                Some(Incoming::Error(reason)) => break Err(TransportError::ConnectionFailed(reason)),
                Some(other) => tracing::debug!("Ignoring {:?}", other),
                None => {
                    tracing::info!("Stream ended by relay");
                    break Ok(());
                }
            },
        }
    };

    connection.close().await;

    let stats = decoder.stats();
    tracing::info!(
        "Listening stopped: {} frames played, {} rejected",
        stats.frames_decoded,
        stats.frames_rejected
    );

    result.map(|_| stats)
}
