//! Compute device selection for the embedder and local generator

use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Which device to run model inference on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cuda,
    Metal,
    Cpu,
    #[default]
    Auto,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow::anyhow!(
                "Invalid device preference: {}. Valid options: cuda, metal, cpu, auto",
                s
            )),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Resolve a preference to a concrete device.
///
/// Accelerators that are unavailable or not compiled in fall back to CPU
/// with a warning; this never fails.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Cuda => cuda_device().unwrap_or_else(|| {
            tracing::warn!("CUDA requested but unavailable, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => metal_device().unwrap_or_else(|| {
            tracing::warn!("Metal requested but unavailable, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => {
            let device = cuda_device().or_else(metal_device).unwrap_or(Device::Cpu);
            tracing::info!("Auto-selected device: {}", device_label(&device));
            device
        }
    }
}

/// Short human-readable name of a device
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(feature = "cuda")]
fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("CUDA initialization failed: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_device() -> Option<Device> {
    None
}

#[cfg(feature = "metal")]
fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("Metal initialization failed: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "metal"))]
fn metal_device() -> Option<Device> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_from_str() {
        assert_eq!(
            "gpu".parse::<DevicePreference>().unwrap(),
            DevicePreference::Cuda
        );
        assert_eq!(
            "CPU".parse::<DevicePreference>().unwrap(),
            DevicePreference::Cpu
        );
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_always_selected() {
        let device = select_device(DevicePreference::Cpu);
        assert_eq!(device_label(&device), "cpu");
    }
}
