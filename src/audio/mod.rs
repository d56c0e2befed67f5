//! Audio subsystem module

pub mod block;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use block::{PcmBlock, SampleBlock};
pub use buffer::{BlockAssembler, RingBuffer};
pub use capture::AudioCapture;
pub use device::{find_device, list_devices, AudioDevice, AudioDeviceInfo, DeviceDirection};
pub use playback::{AudioPlayback, CollectingSink, DiscardSink, PlaybackSink};
