//! End-to-end relay sessions over a loopback socket

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mic_relay::audio::{CollectingSink, SampleBlock};
use mic_relay::client::{ListenSession, RecordSession};
use mic_relay::config::{ClientConfig, RelayConfig};
use mic_relay::error::TransportError;
use mic_relay::protocol::StreamId;
use mic_relay::relay::{RelayServer, SessionRegistry};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const RATE: u32 = 48000;
const BLOCK: usize = 4;

async fn start_relay() -> (ClientConfig, Arc<SessionRegistry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = RelayServer::new(RelayConfig {
        sample_rate: RATE,
        ..RelayConfig::default()
    });
    let registry = server.registry();
    server.start_background(listener);

    let client = ClientConfig {
        relay_url: format!("ws://{}/", addr),
        ..ClientConfig::default()
    };
    (client, registry)
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn block(samples: [f32; BLOCK], sequence: u32) -> SampleBlock {
    SampleBlock::new(samples.to_vec(), RATE, sequence)
}

#[tokio::test]
async fn test_recorder_to_listener() {
    let (client, registry) = start_relay().await;

    let (block_tx, block_rx) = mpsc::channel(16);
    let recorder = RecordSession::attach(&client, BLOCK, RATE, block_rx).await.unwrap();
    let stream_id = recorder.stream_id().clone();
    assert!(registry.get(&stream_id).is_some());

    // Published before anyone listens; must never reach the listener
    block_tx.send(block([0.25; BLOCK], 0)).await.unwrap();
    wait_until(|| {
        let registry = registry.clone();
        let id = stream_id.clone();
        async move { registry.get(&id).map(|s| s.frames_relayed() >= 1).unwrap_or(false) }
    })
    .await;

    let sink = Arc::new(CollectingSink::new());
    let listener = ListenSession::start(&client, stream_id.clone(), sink.clone())
        .await
        .unwrap();
    wait_until(|| {
        let registry = registry.clone();
        let id = stream_id.clone();
        async move { registry.get(&id).map(|s| s.listener_count() == 1).unwrap_or(false) }
    })
    .await;

    block_tx.send(block([0.5, -1.0, 0.0, 1.0], 1)).await.unwrap();
    block_tx.send(block([0.0; BLOCK], 2)).await.unwrap();
    block_tx.send(block([-0.5, 0.5, -0.5, 0.5], 3)).await.unwrap();

    wait_until(|| {
        let sink = sink.clone();
        async move { sink.len() >= 3 }
    })
    .await;

    let blocks = sink.blocks();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].samples, vec![16384, -32768, 0, 32767]);
    assert_eq!(blocks[1].samples, vec![0, 0, 0, 0]);
    assert_eq!(blocks[2].samples, vec![-16384, 16384, -16384, 16384]);
    for decoded in &blocks {
        assert_eq!(decoded.format.sample_rate, RATE);
        assert_eq!(decoded.format.channels, 1);
    }

    let stats = recorder.stop().await.unwrap();
    assert_eq!(stats.blocks_sent, 4);
    assert_eq!(stats.samples_sent, 16);

    let decoded = listener.stop().await.unwrap();
    assert_eq!(decoded.frames_decoded, 3);
}

#[tokio::test]
async fn test_unknown_stream_is_rejected() {
    let (client, registry) = start_relay().await;

    let stream_id: StreamId = "doesnotexist".parse().unwrap();
    let sink = Arc::new(CollectingSink::new());
    let mut listener = ListenSession::start(&client, stream_id, sink.clone()).await.unwrap();

    let result = listener.finished().await;
    assert!(matches!(result, Err(TransportError::Handshake(_))));
    assert!(sink.is_empty());
    assert_eq!(registry.stream_count(), 0);
}

#[tokio::test]
async fn test_recorder_stop_ends_listeners() {
    let (client, registry) = start_relay().await;

    let (_block_tx, block_rx) = mpsc::channel::<SampleBlock>(16);
    let recorder = RecordSession::attach(&client, BLOCK, RATE, block_rx).await.unwrap();
    let stream_id = recorder.stream_id().clone();

    let sink = Arc::new(CollectingSink::new());
    let mut listener = ListenSession::start(&client, stream_id.clone(), sink).await.unwrap();
    wait_until(|| {
        let registry = registry.clone();
        let id = stream_id.clone();
        async move { registry.get(&id).map(|s| s.listener_count() == 1).unwrap_or(false) }
    })
    .await;

    recorder.stop().await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(5), listener.finished())
        .await
        .expect("listener did not end");
    assert!(ended.is_ok());

    wait_until(|| {
        let registry = registry.clone();
        async move { registry.stream_count() == 0 }
    })
    .await;
}

#[tokio::test]
async fn test_bad_query_is_refused() {
    let (client, _registry) = start_relay().await;

    let url = format!("{}?mode=broadcast", client.relay_url);
    let result = tokio_tungstenite::connect_async(url.as_str()).await;
    assert!(result.is_err());
}
