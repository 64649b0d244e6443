//! Compute device selection and probing.

use serde::{Deserialize, Serialize};

/// A resolved compute device binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Parse a runtime device name. Only "cpu" and "cuda" are accepted.
    pub fn parse(name: &str) -> Option<Device> {
        match name.to_lowercase().as_str() {
            "cpu" => Some(Device::Cpu),
            "cuda" => Some(Device::Cuda),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    /// Build the candle device for this binding.
    pub fn to_candle(self) -> Result<candle_core::Device, candle_core::Error> {
        match self {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda => candle_core::Device::new_cuda(0),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured device preference; `Auto` resolves by probing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    /// Resolve the preference against accelerator availability.
    /// `Cuda` without an accelerator falls back to CPU.
    pub fn resolve(self) -> Device {
        match self {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda | DevicePreference::Auto => {
                if cuda_available() {
                    Device::Cuda
                } else {
                    Device::Cpu
                }
            }
        }
    }
}

/// Whether a CUDA accelerator is usable in this process.
pub fn cuda_available() -> bool {
    candle_core::utils::cuda_is_available()
}

/// Snapshot of the engine's device state, reported to collaborators.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    pub device: String,
    pub cuda_available: bool,
    pub provider: String,
    pub dimension: usize,
    /// Number of vectors in the live index, 0 when not ready.
    pub indexed: usize,
}
