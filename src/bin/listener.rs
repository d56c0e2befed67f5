//! Listener Application
//!
//! Subscribes to a stream on the relay and plays it on the default (or
//! configured) output device. Without an output device, frames are decoded
//! and counted only.
//!
//! Usage: `listener <stream-id> [relay-url]`

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_relay::{
    audio::{AudioPlayback, DiscardSink, PlaybackSink},
    client::ListenSession,
    config::AppConfig,
    protocol::StreamId,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let stream_id: StreamId = std::env::args()
        .nth(1)
        .context("usage: listener <stream-id> [relay-url]")?
        .parse()?;

    let mut config = AppConfig::load_or_default(None)?;
    if let Some(url) = std::env::args().nth(2) {
        config.client.relay_url = url;
    }

    let playback = match AudioPlayback::new(&config.playback) {
        Ok(mut playback) => match playback.start() {
            Ok(()) => Some(Arc::new(playback)),
            Err(e) => {
                tracing::warn!("Failed to start playback, decoding only: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("No output device, decoding only: {}", e);
            None
        }
    };

    let discard = Arc::new(DiscardSink::new());
    let sink: Arc<dyn PlaybackSink> = match &playback {
        Some(playback) => playback.clone(),
        None => discard.clone(),
    };

    let mut session = ListenSession::start(&config.client, stream_id, sink).await?;
    println!("Listening to {} - press Ctrl+C to stop", session.stream_id());

    let ended = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = session.finished() => Some(result),
    };

    let result = match ended {
        Some(result) => result,
        None => session.stop().await,
    };

    match result {
        Ok(stats) => println!(
            "Listening stopped ({} frames played, {} rejected)",
            stats.frames_decoded, stats.frames_rejected
        ),
        Err(e) => println!("Listening stopped: {}", e),
    }

    match &playback {
        Some(playback) => {
            let stats = playback.stats();
            println!(
                "Playback: {} underruns, {} overflows, {} rate mismatches, {} device errors",
                stats.underruns, stats.overflows, stats.rate_mismatches, stats.stream_errors
            );
        }
        None => println!(
            "Discarded {} blocks ({} samples)",
            discard.blocks(),
            discard.samples()
        ),
    }

    Ok(())
}
