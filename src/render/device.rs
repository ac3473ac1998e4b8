use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SupportedStreamConfig};
use log::{debug, warn};

use crate::error::AudioError;

/// Summary of an output device, for listings
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub sample_format: Option<SampleFormat>,
}

/// Enumerates and selects output devices on the default host
pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn host_name(&self) -> &'static str {
        self.host.id().name()
    }

    pub fn default_device_name(&self) -> Option<String> {
        self.host.default_output_device().and_then(|device| device.name().ok())
    }

    /// All output devices with their default configuration where it can be queried
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        let default_name = self.default_device_name();
        let devices = self
            .host
            .output_devices()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;

        let mut infos = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let config = device.default_output_config().ok();
            infos.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                channels: config.as_ref().map(|c| c.channels()),
                sample_format: config.as_ref().map(|c| c.sample_format()),
                name,
            });
        }
        Ok(infos)
    }

    /// The named device if present, otherwise the default output device
    pub fn select(&self, preferred: Option<&str>) -> Result<Device, AudioError> {
        if let Some(name) = preferred {
            match self.find(name) {
                Ok(Some(device)) => return Ok(device),
                Ok(None) => warn!("Audio device '{}' not found, falling back to the default device", name),
                Err(e) => warn!("Could not look up audio device '{}': {}", name, e),
            }
        }

        self.host.default_output_device().ok_or_else(|| AudioError::DeviceNotFound {
            device: preferred.unwrap_or("default").to_string(),
        })
    }

    fn find(&self, name: &str) -> Result<Option<Device>, AudioError> {
        let mut devices = self
            .host
            .output_devices()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices.find(|device| device.name().map(|n| n == name).unwrap_or(false)))
    }

    pub fn output_config(device: &Device) -> Result<SupportedStreamConfig, AudioError> {
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config: {}", e)))?;
        debug!(
            "Output config: {} Hz, {} channels, {:?}",
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );
        Ok(config)
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
