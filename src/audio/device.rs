//! Output device enumeration and exclusive ownership

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::AudioError;

/// Description of an output device, for listing in the UI
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = get_device_capabilities(&device);
            Some(OutputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [22050u32, 32000, 44100, 48000, 88200, 96000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

/// Get default output device
pub fn default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceFailure("No default output device".to_string()))
}

/// Ownership slot for one physical output device.
///
/// At most one `DeviceLease` per slot exists at a time. `DeviceSlot::system()`
/// is the process-wide slot for the default output device.
#[derive(Debug, Clone, Default)]
pub struct DeviceSlot {
    in_use: Arc<AtomicBool>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot guarding the system output device
    pub fn system() -> Self {
        static SYSTEM: OnceLock<DeviceSlot> = OnceLock::new();
        SYSTEM.get_or_init(DeviceSlot::new).clone()
    }

    /// Claim the device, failing if another render engine holds it
    pub fn acquire(&self) -> Result<DeviceLease, AudioError> {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| DeviceLease {
                in_use: self.in_use.clone(),
            })
            .map_err(|_| AudioError::DeviceFailure("output device already in use".to_string()))
    }

    /// Whether a lease is currently held
    pub fn is_held(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Claim on an output device, released on drop
#[derive(Debug)]
pub struct DeviceLease {
    in_use: Arc<AtomicBool>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive() {
        let slot = DeviceSlot::new();
        let lease = slot.acquire().unwrap();
        assert!(slot.is_held());
        assert!(matches!(slot.acquire(), Err(AudioError::DeviceFailure(_))));

        drop(lease);
        assert!(!slot.is_held());
        assert!(slot.acquire().is_ok());
    }

    #[test]
    fn test_system_slot_is_shared() {
        let a = DeviceSlot::system();
        let b = DeviceSlot::system();
        assert!(Arc::ptr_eq(&a.in_use, &b.in_use));
    }
}
