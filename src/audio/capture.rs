//! Audio capture from the input device
//!
//! The cpal stream lives on a dedicated thread (streams are not `Send`).
//! Each callback becomes one mono [`SampleBlock`] pushed into a bounded
//! channel; when the consumer falls behind, blocks are dropped. Errors the
//! device raises after startup go to a second channel, see
//! [`AudioCapture::take_errors`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::block::SampleBlock;
use crate::audio::device::{find_device, AudioDevice, DeviceDirection};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

const ERROR_QUEUE: usize = 16;

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn resolve_input(device_id: Option<&str>) -> Result<AudioDevice, CaptureError> {
    find_device(DeviceDirection::Input, device_id).ok_or_else(|| {
        CaptureError::DeviceNotFound(device_id.unwrap_or("No default input device").to_string())
    })
}

/// Microphone capture for one recording session
pub struct AudioCapture {
    device_id: Option<String>,

    running: Arc<AtomicBool>,

    /// Destination for captured blocks
    block_tx: mpsc::Sender<SampleBlock>,

    thread_handle: Option<JoinHandle<()>>,

    /// Stream errors raised after startup, until taken by the consumer
    error_rx: Option<mpsc::Receiver<CaptureError>>,

    sequence: Arc<AtomicU32>,

    samples_captured: Arc<AtomicU64>,

    blocks_dropped: Arc<AtomicU64>,

    config: StreamConfig,
}

impl AudioCapture {
    /// Prepare capture on the configured (or default) input device
    pub fn new(config: &CaptureConfig, block_tx: mpsc::Sender<SampleBlock>) -> Result<Self, CaptureError> {
        if config.sample_rate == 0 || config.block_size == 0 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} Hz with {}-sample blocks",
                config.sample_rate, config.block_size
            )));
        }

        let device = resolve_input(config.device_id.as_deref())?;

        let default_config = device
            .inner()
            .default_input_config()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        tracing::info!(
            "Capture device: {} ({} channel(s) at {} Hz)",
            device.name,
            stream_config.channels,
            config.sample_rate
        );

        Ok(Self {
            device_id: config.device_id.clone(),
            running: Arc::new(AtomicBool::new(false)),
            block_tx,
            thread_handle: None,
            error_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            blocks_dropped: Arc::new(AtomicU64::new(0)),
            config: stream_config,
        })
    }

    /// Start capturing. Returns once the device stream is playing or failed.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_input(self.device_id.as_deref())?;
        let (error_tx, error_rx) = mpsc::channel::<CaptureError>(ERROR_QUEUE);
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let block_tx = self.block_tx.clone();
        let sequence = self.sequence.clone();
        let samples_captured = self.samples_captured.clone();
        let blocks_dropped = self.blocks_dropped.clone();
        let config = self.config.clone();
        let channels = self.config.channels as usize;
        let sample_rate = self.config.sample_rate.0;

        self.sequence.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        let samples = downmix_to_mono(data, channels);
                        samples_captured.fetch_add(samples.len() as u64, Ordering::Relaxed);
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);

                        if block_tx.try_send(SampleBlock::new(samples, sample_rate, seq)).is_err() {
                            blocks_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        tracing::error!("Capture stream error: {}", err);
                        let _ = error_tx.try_send(CaptureError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CaptureError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, releasing the device
            })
            .map_err(|e| CaptureError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let startup = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or(Err(CaptureError::StartupTimeout));

        if let Err(e) = startup {
            self.stop();
            return Err(e);
        }

        tracing::info!("Capture started");
        Ok(())
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Capture stopped: {} samples, {} blocks dropped",
                self.samples_captured(),
                self.blocks_dropped()
            );
        }
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn blocks_dropped(&self) -> u64 {
        self.blocks_dropped.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Hand over the device error channel. Available once after each `start`.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<CaptureError>> {
        self.error_rx.take()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix() {
        assert_eq!(downmix_to_mono(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_unknown_device() {
        let (tx, _rx) = mpsc::channel(1);
        let config = CaptureConfig {
            device_id: Some("input:no such microphone".to_string()),
            ..Default::default()
        };
        assert!(matches!(AudioCapture::new(&config, tx), Err(CaptureError::DeviceNotFound(_))));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let config = CaptureConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(AudioCapture::new(&config, tx), Err(CaptureError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_capture_creation() {
        // Only meaningful on machines with an input device
        let (tx, _rx) = mpsc::channel(4);
        if find_device(DeviceDirection::Input, None).is_some() {
            let capture = AudioCapture::new(&CaptureConfig::default(), tx);
            if let Ok(mut capture) = capture {
                assert_eq!(capture.sample_rate(), 48000);
                assert!(capture.take_errors().is_none());
            }
        }
    }
}
