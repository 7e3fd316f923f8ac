//! Inference target device.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Hardware the server should run inference on.
///
/// `Auto` lets the server choose and is never sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Device {
    Cpu,
    Gpu,
    Npu,
    #[default]
    Auto,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Npu => "NPU",
            Self::Auto => "AUTO",
        }
    }

    /// Value for the `device` request parameter; `None` for `Auto`.
    pub fn request_param(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            other => Some(other.as_str()),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = CoreError;

    /// Case-insensitive: `gpu`, `GPU` and `Gpu` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "npu" => Ok(Self::Npu),
            "auto" => Ok(Self::Auto),
            other => Err(CoreError::Validation(format!(
                "Unknown device '{other}', expected one of cpu, gpu, npu, auto"
            ))),
        }
    }
}
