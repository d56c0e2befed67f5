//! Audio playback to the output device
//!
//! Decoded blocks are handed over through [`PlaybackSink::play`], which must
//! never block the network task. The cpal output callback drains a lock-free
//! queue and fills silence on underrun. Device errors raised after startup
//! are logged and counted in [`PlaybackStats`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
use crate::audio::device::{find_device, AudioDevice, DeviceDirection};
use crate::codec::decoder::DecodedBlock;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for decoded audio
pub trait PlaybackSink: Send + Sync {
    /// Schedule a block for immediate rendering. Must not block.
    fn play(&self, block: DecodedBlock);
}

/// Sink that keeps every block in memory, for headless listeners
#[derive(Default)]
pub struct CollectingSink {
    blocks: Mutex<Vec<DecodedBlock>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the blocks received so far
    pub fn blocks(&self) -> Vec<DecodedBlock> {
        self.blocks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

impl PlaybackSink for CollectingSink {
    fn play(&self, block: DecodedBlock) {
        self.blocks.lock().push(block);
    }
}

/// Sink that only counts what it is given, for listeners without an output device
#[derive(Default)]
pub struct DiscardSink {
    blocks: AtomicU64,
    samples: AtomicU64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl PlaybackSink for DiscardSink {
    fn play(&self, block: DecodedBlock) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(block.samples.len() as u64, Ordering::Relaxed);
    }
}

/// Spread a decoded block over `out_channels` interleaved output channels
pub fn expand_channels(block: &DecodedBlock, out_channels: usize) -> Vec<f32> {
    let samples = block.to_f32();
    let in_channels = block.format.channels.max(1) as usize;

    if in_channels == out_channels {
        return samples;
    }

    let mut out = Vec::with_capacity(block.frames() * out_channels);
    for frame in samples.chunks(in_channels) {
        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
        out.extend(std::iter::repeat(mono).take(out_channels));
    }
    out
}

/// Read position into the chunk currently being played
#[derive(Default)]
struct OutputCursor {
    chunk: Vec<f32>,
    pos: usize,
}

impl OutputCursor {
    /// Fill one device buffer from the queue. Whatever the queue cannot
    /// cover is silence, and counts as one underrun.
    fn fill(&mut self, out: &mut [f32], queue: &RingBuffer<Vec<f32>>) {
        let mut written = 0;
        while written < out.len() {
            if self.pos >= self.chunk.len() {
                match queue.pop() {
                    Some(chunk) => {
                        self.chunk = chunk;
                        self.pos = 0;
                        continue;
                    }
                    None => break,
                }
            }

            let n = (self.chunk.len() - self.pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
            written += n;
            self.pos += n;
        }
        out[written..].fill(0.0);
    }
}

fn resolve_output(device_id: Option<&str>) -> Result<AudioDevice, PlaybackError> {
    find_device(DeviceDirection::Output, device_id).ok_or_else(|| {
        PlaybackError::DeviceNotFound(device_id.unwrap_or("No default output device").to_string())
    })
}

/// Output device playback
pub struct AudioPlayback {
    device_id: Option<String>,
    config: StreamConfig,
    queue: SharedRingBuffer<Vec<f32>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stream_errors: Arc<AtomicU64>,
    rate_mismatches: AtomicU64,
}

impl AudioPlayback {
    pub fn new(config: &PlaybackConfig) -> Result<Self, PlaybackError> {
        let device = resolve_output(config.device_id.as_deref())?;

        let default_config = device
            .inner()
            .default_output_config()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        tracing::info!(
            "Playback device: {} ({} channel(s) at {} Hz)",
            device.name,
            stream_config.channels,
            config.sample_rate
        );

        Ok(Self {
            device_id: config.device_id.clone(),
            config: stream_config,
            queue: create_shared_buffer(config.queue_frames),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            stream_errors: Arc::new(AtomicU64::new(0)),
            rate_mismatches: AtomicU64::new(0),
        })
    }

    /// Open the output stream. Returns once it is playing or failed.
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_output(self.device_id.as_deref())?;
        let (ready_tx, ready_rx) = bounded::<Result<(), PlaybackError>>(1);

        let running = self.running.clone();
        let queue = self.queue.clone();
        let stream_errors = self.stream_errors.clone();
        let config = self.config.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut cursor = OutputCursor::default();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        cursor.fill(data, &queue);
                    },
                    move |err| {
                        stream_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("Playback stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlaybackError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| PlaybackError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let startup = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or(Err(PlaybackError::StartupTimeout));

        if let Err(e) = startup {
            self.stop();
            return Err(e);
        }

        tracing::info!("Playback started");
        Ok(())
    }

    /// Stop the output stream and drop anything still queued
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.queue.clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            queued: self.queue.len(),
            overflows: self.queue.overflow_count() as u64,
            underruns: self.queue.underrun_count() as u64,
            rate_mismatches: self.rate_mismatches.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

impl PlaybackSink for AudioPlayback {
    fn play(&self, block: DecodedBlock) {
        if block.format.sample_rate != self.sample_rate() {
            self.rate_mismatches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Dropping {} Hz frame on {} Hz output",
                block.format.sample_rate,
                self.sample_rate()
            );
            return;
        }

        let chunk = expand_channels(&block, self.config.channels as usize);
        if !self.queue.push(chunk) {
            tracing::debug!("Playback queue full, frame dropped");
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackStats {
    pub queued: usize,
    pub overflows: u64,
    /// Device buffers padded with silence
    pub underruns: u64,
    pub rate_mismatches: u64,
    pub stream_errors: u64,
}
