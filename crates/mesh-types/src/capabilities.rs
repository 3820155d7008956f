//! Device capability descriptors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The (fp32, fp16, int8) throughput rates a device declares, in FLOPS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceFlops {
    /// FP32 throughput, in FLOPS.
    pub fp32: f64,
    /// FP16 throughput, in FLOPS.
    pub fp16: f64,
    /// INT8 throughput, in FLOPS.
    pub int8: f64,
}

impl DeviceFlops {
    /// All-zero FLOPS triple, used by [`DeviceCapabilities::unknown`].
    pub const ZERO: Self = Self {
        fp32: 0.0,
        fp16: 0.0,
        int8: 0.0,
    };

    /// Sum of all three declared rates.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.fp32 + self.fp16 + self.int8
    }
}

/// A node's declared model, chip, memory, and FLOPS capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Device/model name, e.g. "MacBook Pro".
    pub model: String,
    /// Chip identifier, e.g. "Apple M2".
    pub chip: String,
    /// Device memory, in bytes.
    pub memory: u64,
    /// Declared FLOPS triple.
    pub flops: DeviceFlops,
}

impl DeviceCapabilities {
    /// The distinguished "nothing declared yet" value, used before a
    /// node's real capabilities have been probed.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            model: "UNKNOWN".to_string(),
            chip: "UNKNOWN".to_string(),
            memory: 0,
            flops: DeviceFlops::ZERO,
        }
    }

    /// Serialize to the key-value mapping used on the discovery wire.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("model".to_string(), Value::String(self.model.clone()));
        map.insert("chip".to_string(), Value::String(self.chip.clone()));
        map.insert("memory".to_string(), Value::from(self.memory));
        map.insert(
            "flops".to_string(),
            serde_json::to_value(self.flops).unwrap_or(Value::Null),
        );
        map
    }

    /// Deserialize from the key-value mapping used on the discovery wire.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilitiesError`] if a required field is missing or has
    /// the wrong shape.
    pub fn from_map(map: &HashMap<String, Value>) -> Result<Self, CapabilitiesError> {
        let model = map
            .get("model")
            .and_then(Value::as_str)
            .ok_or(CapabilitiesError::MissingField("model"))?
            .to_string();
        let chip = map
            .get("chip")
            .and_then(Value::as_str)
            .ok_or(CapabilitiesError::MissingField("chip"))?
            .to_string();
        let memory = map
            .get("memory")
            .and_then(Value::as_u64)
            .ok_or(CapabilitiesError::MissingField("memory"))?;
        let flops = map
            .get("flops")
            .cloned()
            .ok_or(CapabilitiesError::MissingField("flops"))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| CapabilitiesError::InvalidField("flops", e))
            })?;

        Ok(Self {
            model,
            chip,
            memory,
            flops,
        })
    }
}

/// Errors parsing a [`DeviceCapabilities`] key-value mapping.
#[derive(Debug, Error)]
pub enum CapabilitiesError {
    /// A required field was absent or of the wrong JSON type.
    #[error("missing or malformed capability field: {0}")]
    MissingField(&'static str),
    /// A field was present but failed to deserialize into its expected type.
    #[error("invalid capability field {0}: {1}")]
    InvalidField(&'static str, #[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_has_zero_flops_and_memory() {
        let caps = DeviceCapabilities::unknown();
        assert_eq!(caps.memory, 0);
        assert_eq!(caps.flops.total(), 0.0);
    }

    #[test]
    fn map_round_trip() {
        let caps = DeviceCapabilities {
            model: "Device_A".to_string(),
            chip: "Chip_A".to_string(),
            memory: 8000,
            flops: DeviceFlops {
                fp32: 10.0,
                fp16: 20.0,
                int8: 40.0,
            },
        };
        let map = caps.to_map();
        let round_tripped = DeviceCapabilities::from_map(&map).unwrap();
        assert_eq!(caps, round_tripped);
    }

    #[test]
    fn from_map_rejects_missing_field() {
        let mut map = HashMap::new();
        map.insert("model".to_string(), Value::String("x".to_string()));
        let err = DeviceCapabilities::from_map(&map).unwrap_err();
        assert!(matches!(err, CapabilitiesError::MissingField("chip")));
    }
}
