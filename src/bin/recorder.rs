//! Recorder Application
//!
//! Captures the default (or configured) microphone and publishes it to the
//! relay until Ctrl+C or until the relay goes away.
//!
//! Usage: `recorder [relay-url]`

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_relay::{audio::device::list_devices, client::RecordSession, config::AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting recorder");

    let mut config = AppConfig::load_or_default(None)?;
    if let Some(url) = std::env::args().nth(1) {
        config.client.relay_url = url;
    }

    if let Some((capture, relay)) = config.rate_mismatch() {
        tracing::warn!(
            "Capturing at {} Hz but the relay is configured for {} Hz; listeners will play at the wrong speed",
            capture,
            relay
        );
    }

    println!("\n=== Available Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input()) {
        let selected = match &config.capture.device_id {
            Some(id) => *id == device.id || *id == device.name,
            None => device.is_default,
        };
        if selected && !device.sample_rates.is_empty() && !device.supports_rate(config.capture.sample_rate) {
            tracing::warn!(
                "{} does not list {} Hz among {:?}",
                device.name,
                config.capture.sample_rate,
                device.sample_rates
            );
        }

        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let mut session = RecordSession::start(&config).await?;

    println!("Stream ID: {}", session.stream_id());
    println!("Listen URL: {}", session.listen_url(&config.client.relay_url)?);
    println!("Press Ctrl+C to stop");

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
            "Recording stopped ({} blocks sent, {} dropped)",
            stats.blocks_sent, stats.blocks_dropped
        ),
        Err(e) => println!("Recording stopped: {}", e),
    }

    Ok(())
}
