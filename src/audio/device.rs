//! Microphone and speaker lookup
//!
//! Devices are addressed as `input:<name>` or `output:<name>`. A bare name is
//! taken to be an input, since the recorder is the usual caller.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use std::fmt;

/// Rates checked when listing devices
const CANDIDATE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

impl DeviceDirection {
    fn prefix(self) -> &'static str {
        match self {
            DeviceDirection::Input => "input",
            DeviceDirection::Output => "output",
        }
    }

    /// Split a device id into its direction and device name
    pub fn parse_id(id: &str) -> (Self, &str) {
        if let Some(name) = id.strip_prefix("output:") {
            (DeviceDirection::Output, name)
        } else {
            (DeviceDirection::Input, id.strip_prefix("input:").unwrap_or(id))
        }
    }

    pub fn device_id(self, name: &str) -> String {
        format!("{}:{}", self.prefix(), name)
    }
}

impl fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// What `list_devices` reports about one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

impl AudioDeviceInfo {
    pub fn is_input(&self) -> bool {
        self.direction == DeviceDirection::Input
    }

    /// Whether `sample_rate` is one of the listed rates the device accepts
    pub fn supports_rate(&self, sample_rate: u32) -> bool {
        self.sample_rates.contains(&sample_rate)
    }
}

/// An opened cpal endpoint with its resolved name
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: DeviceDirection,
}

impl AudioDevice {
    fn new(device: cpal::Device, direction: DeviceDirection) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            direction,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

fn endpoints(host: &cpal::Host, direction: DeviceDirection) -> Vec<cpal::Device> {
    let devices = match direction {
        DeviceDirection::Input => host.input_devices().map(|it| it.collect()),
        DeviceDirection::Output => host.output_devices().map(|it| it.collect()),
    };
    devices.unwrap_or_else(|e| {
        tracing::debug!("Cannot enumerate {} devices: {}", direction, e);
        Vec::new()
    })
}

fn default_endpoint(host: &cpal::Host, direction: DeviceDirection) -> Option<cpal::Device> {
    match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    }
}

/// Every microphone and speaker on the default host, inputs first
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();

    [DeviceDirection::Input, DeviceDirection::Output]
        .into_iter()
        .flat_map(|direction| {
            let default_name = default_endpoint(&host, direction).and_then(|d| d.name().ok());
            endpoints(&host, direction)
                .into_iter()
                .filter_map(move |device| {
                    let name = device.name().ok()?;
                    let (sample_rates, channels) = capabilities(&device, direction);
                    Some(AudioDeviceInfo {
                        id: direction.device_id(&name),
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        name,
                        direction,
                        sample_rates,
                        channels,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn capabilities(device: &cpal::Device, direction: DeviceDirection) -> (Vec<u32>, Vec<u16>) {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        DeviceDirection::Input => device.supported_input_configs().map(|it| it.collect()),
        DeviceDirection::Output => device.supported_output_configs().map(|it| it.collect()),
    }
    .unwrap_or_default();

    let mut sample_rates: Vec<u32> = CANDIDATE_RATES
        .into_iter()
        .filter(|&rate| {
            ranges.iter().any(|range| {
                range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0
            })
        })
        .collect();
    sample_rates.dedup();

    let mut channels: Vec<u16> = ranges.iter().map(|range| range.channels()).collect();
    channels.sort_unstable();
    channels.dedup();

    (sample_rates, channels)
}

/// Find a device by id, or the host default when `id` is `None`
pub fn find_device(direction: DeviceDirection, id: Option<&str>) -> Option<AudioDevice> {
    let Some(id) = id else {
        return default_endpoint(&cpal::default_host(), direction).map(|d| AudioDevice::new(d, direction));
    };

    let (wanted, name) = DeviceDirection::parse_id(id);
    if wanted != direction {
        return None;
    }

    let host = cpal::default_host();

    endpoints(&host, direction)
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .map(|d| AudioDevice::new(d, direction))
}
