//! # Compute Device Selection
//!
//! Picks the candle device the Whisper model runs on. GPU preferences fall back to
//! the CPU when the backend is unavailable, so a misconfigured host still starts.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Device preference from `transcription.device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available: CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    /// Falls back to CPU if no CUDA device is present
    Cuda,
    /// Falls back to CPU if no Metal device is present
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference string into a device, logging what was picked.
pub fn select_device(preference: &str) -> Device {
    let preference = preference.parse::<DevicePreference>().unwrap_or_else(|e| {
        warn!("{}, using auto", e);
        DevicePreference::Auto
    });

    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
        DevicePreference::Auto => cuda_device().or_else(metal_device).unwrap_or(Device::Cpu),
    };

    info!(preference = ?preference, device = %describe(&device), "Selected compute device");
    device
}

fn cuda_device() -> Option<Device> {
    Device::new_cuda(0)
        .map_err(|e| debug!("CUDA not available: {}", e))
        .ok()
}

fn metal_device() -> Option<Device> {
    Device::new_metal(0)
        .map_err(|e| debug!("Metal not available: {}", e))
        .ok()
}

/// Short device name for logs and the health endpoint.
pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
