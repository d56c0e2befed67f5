//! Recorder session: microphone → relay
//!
//! The session owns the capture device and the relay connection. Captured
//! samples are re-chunked into fixed blocks and sent one block per message.
//! Stopping the session releases the device and closes the channel; a channel
//! that closes on its own, or a device error, ends the session the same way.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::block::SampleBlock;
use crate::audio::buffer::BlockAssembler;
use crate::audio::capture::AudioCapture;
use crate::client::connection::{try_enqueue, Incoming, RelayConnection};
use crate::config::{AppConfig, ClientConfig};
use crate::error::{CaptureError, Error, TransportError};
use crate::protocol::{ConnectMode, ControlMessage, StreamId};

/// Publisher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub blocks_sent: u64,
    /// Blocks dropped because the outgoing queue was full
    pub blocks_dropped: u64,
    pub samples_sent: u64,
}

/// A live recording published to the relay
pub struct RecordSession {
    stream_id: StreamId,
    capture: Option<AudioCapture>,
    stop_tx: Option<oneshot::Sender<()>>,
    publisher: Option<JoinHandle<Result<PublishStats, Error>>>,
}

impl RecordSession {
    /// Open the microphone, connect with `mode=record` and start publishing
    pub async fn start(config: &AppConfig) -> Result<Self, Error> {
        let (block_tx, block_rx) = mpsc::channel(config.capture.queue_blocks.max(1));

        let mut capture = AudioCapture::new(&config.capture, block_tx)?;
        capture.start()?;

        let attached = Self::open(
            &config.client,
            config.capture.block_size,
            capture.sample_rate(),
            block_rx,
            capture.take_errors(),
        )
        .await;

        match attached {
            Ok(mut session) => {
                session.capture = Some(capture);
                Ok(session)
            }
            Err(e) => {
                capture.stop();
                Err(e.into())
            }
        }
    }

    /// Publish blocks from any source (no capture device involved)
    pub async fn attach(
        client: &ClientConfig,
        block_size: usize,
        sample_rate: u32,
        blocks: mpsc::Receiver<SampleBlock>,
    ) -> Result<Self, TransportError> {
        Self::open(client, block_size, sample_rate, blocks, None).await
    }

    async fn open(
        client: &ClientConfig,
        block_size: usize,
        sample_rate: u32,
        blocks: mpsc::Receiver<SampleBlock>,
        device_errors: Option<mpsc::Receiver<CaptureError>>,
    ) -> Result<Self, TransportError> {
        let mut connection =
            RelayConnection::connect(&client.relay_url, &ConnectMode::Record, client.send_queue_frames).await?;

        let timeout = Duration::from_millis(client.handshake_timeout_ms);
        let stream_id = match connection.wait_for_record_start(timeout).await {
            Ok(id) => id,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        tracing::info!("Recording to stream {}", stream_id);

        let (stop_tx, stop_rx) = oneshot::channel();
        let assembler = BlockAssembler::new(block_size, sample_rate);
        let publisher = tokio::spawn(publish(connection, blocks, device_errors, assembler, stop_rx));

        Ok(Self {
            stream_id,
            capture: None,
            stop_tx: Some(stop_tx),
            publisher: Some(publisher),
        })
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// URL a listener connects to for this stream
    pub fn listen_url(&self, relay_url: &str) -> Result<url::Url, TransportError> {
        ConnectMode::Listen {
            stream_id: self.stream_id.clone(),
        }
        .connect_url(relay_url)
    }

    /// Wait for the session to end on its own (channel closed, device lost
    /// or source gone)
    pub async fn finished(&mut self) -> Result<PublishStats, Error> {
        let result = match self.publisher.take() {
            Some(handle) => handle
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?,
            None => Ok(PublishStats::default()),
        };

        self.release_capture();
        result
    }

    /// Stop recording: release the microphone, then close the channel
    pub async fn stop(mut self) -> Result<PublishStats, Error> {
        self.release_capture();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.finished().await
    }

    fn release_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}

fn send_block(
    queue: &mpsc::Sender<Bytes>,
    block: &SampleBlock,
    stats: &mut PublishStats,
) -> Result<(), TransportError> {
    if try_enqueue(queue, block.to_le_bytes())? {
        stats.blocks_sent += 1;
        stats.samples_sent += block.len() as u64;
    } else {
        stats.blocks_dropped += 1;
        tracing::debug!("Send queue full, block {} dropped", block.sequence);
    }
    Ok(())
}

/// Next error from the capture device; pending forever without a device
async fn next_device_error(errors: &mut Option<mpsc::Receiver<CaptureError>>) -> CaptureError {
    loop {
        let Some(rx) = errors.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Some(err) => return err,
            None => *errors = None,
        }
    }
}

async fn publish(
    mut connection: RelayConnection,
    mut blocks: mpsc::Receiver<SampleBlock>,
    mut device_errors: Option<mpsc::Receiver<CaptureError>>,
    mut assembler: BlockAssembler,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<PublishStats, Error> {
    let mut stats = PublishStats::default();

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break Ok(()),
            err = next_device_error(&mut device_errors) => break Err(Error::Capture(err)),
            block = blocks.recv() => match block {
                Some(block) => {
                    let sent = assembler
                        .push(&block.samples)
                        .iter()
                        .try_for_each(|out| send_block(connection.outgoing(), out, &mut stats));
                    if let Err(e) = sent {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            incoming = connection.recv() => match incoming {
                Some(Incoming::Control(ControlMessage::Error(reason))) => {
                    break Err(TransportError::ConnectionFailed(reason).into());
                }
                Some(Incoming::Error(reason)) => {
                    break Err(TransportError::ConnectionFailed(reason).into());
                }
                Some(_) => {}
                None => break Err(TransportError::Closed.into()),
            },
        }
    };

    connection.close().await;

    match &result {
        Ok(()) => tracing::info!(
            "Recording stopped: {} blocks sent, {} dropped",
            stats.blocks_sent,
            stats.blocks_dropped
        ),
        Err(e) => tracing::warn!("Recording stopped: {}", e),
    }

    result.map(|_| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::RelayServer;
    use tokio::net::TcpListener;

    async fn relay() -> ClientConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        RelayServer::new(RelayConfig::default()).start_background(listener);
        ClientConfig {
            relay_url: format!("ws://{}/", addr),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_full_send_queue_drops_block() {
        let (queue, _rx) = mpsc::channel(1);
        let block = SampleBlock::new(vec![0.25; 8], 48000, 0);
        let mut stats = PublishStats::default();

        send_block(&queue, &block, &mut stats).unwrap();
        send_block(&queue, &block, &mut stats).unwrap();

        assert_eq!(
            stats,
            PublishStats {
                blocks_sent: 1,
                blocks_dropped: 1,
                samples_sent: 8,
            }
        );
    }

    #[test]
    fn test_closed_send_queue_is_an_error() {
        let (queue, rx) = mpsc::channel(1);
        drop(rx);
        let block = SampleBlock::new(vec![0.0; 4], 48000, 0);
        let mut stats = PublishStats::default();
        assert!(matches!(
            send_block(&queue, &block, &mut stats),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_device_error_ends_session() {
        let client = relay().await;
        let (_block_tx, block_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel(4);

        let mut session = RecordSession::open(&client, 4, 48000, block_rx, Some(error_rx))
            .await
            .unwrap();

        error_tx
            .send(CaptureError::StreamError("device unplugged".to_string()))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), session.finished())
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::Capture(CaptureError::StreamError(_)))));
    }

    #[tokio::test]
    async fn test_dropped_error_channel_keeps_publishing() {
        let client = relay().await;
        let (block_tx, block_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel::<CaptureError>(1);
        drop(error_tx);

        let mut session = RecordSession::open(&client, 4, 48000, block_rx, Some(error_rx))
            .await
            .unwrap();
        block_tx.send(SampleBlock::new(vec![0.5; 4], 48000, 0)).await.unwrap();
        drop(block_tx);

        let stats = tokio::time::timeout(Duration::from_secs(5), session.finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.blocks_sent, 1);
    }
}
