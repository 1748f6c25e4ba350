use std::fmt::Display;

use burn::backend::libtorch::LibTorchDevice;
use serde::{Deserialize, Serialize};

/// Which device to place the model on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    /// Use the first CUDA device when one is available, otherwise the CPU
    #[default]
    Auto,

    /// Always use the CPU
    Cpu,

    /// Use a specific CUDA device, falling back to the CPU if it does not exist
    Cuda(usize),
}

impl DevicePreference {
    /// Probe the hardware once and pick a concrete device
    pub fn resolve(self) -> LibTorchDevice {
        let cuda_devices = if tch::Cuda::is_available() {
            tch::Cuda::device_count().max(0) as usize
        } else {
            0
        };

        let device = select(self, cuda_devices);
        info!("Using device {:?} ({} CUDA device(s) detected)", device, cuda_devices);

        device
    }
}

/// Map a preference onto the devices that exist
fn select(preference: DevicePreference, cuda_devices: usize) -> LibTorchDevice {
    match preference {
        DevicePreference::Auto if cuda_devices > 0 => LibTorchDevice::Cuda(0),
        DevicePreference::Auto | DevicePreference::Cpu => LibTorchDevice::Cpu,
        DevicePreference::Cuda(index) if index < cuda_devices => LibTorchDevice::Cuda(index),
        DevicePreference::Cuda(index) => {
            warn!("CUDA device {} is not available, falling back to the CPU", index);
            LibTorchDevice::Cpu
        }
    }
}

impl TryFrom<&str> for DevicePreference {
    type Error = DeviceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_lowercase();

        match value.as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DevicePreference::Cuda)
                .ok_or_else(|| DeviceError::Unknown(value.clone())),
        }
    }
}

impl Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Device Error
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    /// The string names no known device
    #[error("unknown device {0}; expected auto, cpu, cuda or cuda:N")]
    Unknown(String),
}
