//! Backend and data mover configuration.

use hdx_common::{Result, error::Error, verify_arg};
use serde::{Deserialize, Serialize};

use crate::enums::BackendKind;

/// Default capacity of the emulated device heap: 256 MiB.
const DEFAULT_DEVICE_MEMORY_BYTES: usize = 256 * 1024 * 1024;

const DEFAULT_DMA_CHANNELS: usize = 2;

/// Upper bound on DMA channels; each channel owns one worker thread.
const MAX_DMA_CHANNELS: usize = 64;

const DEFAULT_MAX_QUEUED_TRANSFERS: usize = 4 * 1024;

/// Settings of the emulated XRT runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Capacity of the device heap in bytes. Reservations beyond it fail with
    /// `AllocationFailure`.
    pub device_memory_bytes: usize,

    /// Number of DMA engine channels.
    pub dma_channels: usize,

    /// Whether `Dual` regions alias a single backing instead of keeping
    /// separate host and device pages.
    pub zero_copy_dual: bool,

    /// Page-lock the host side of `Dual` regions, falling back to pageable
    /// pages when locking is not permitted.
    pub pin_host_buffers: bool,

    /// Maximum number of copies queued across all channels.
    pub max_queued_transfers: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            device_memory_bytes: DEFAULT_DEVICE_MEMORY_BYTES,
            dma_channels: DEFAULT_DMA_CHANNELS,
            zero_copy_dual: false,
            pin_host_buffers: true,
            max_queued_transfers: DEFAULT_MAX_QUEUED_TRANSFERS,
        }
    }
}

impl EmulatorConfig {
    pub fn validate(&self) -> Result<()> {
        verify_arg!(device_memory_bytes, self.device_memory_bytes != 0);
        verify_arg!(dma_channels, self.dma_channels != 0);
        verify_arg!(dma_channels, self.dma_channels <= MAX_DMA_CHANNELS);
        verify_arg!(max_queued_transfers, self.max_queued_transfers != 0);
        Ok(())
    }

    pub fn with_device_memory(mut self, bytes: usize) -> Self {
        self.device_memory_bytes = bytes;
        self
    }

    pub fn with_dma_channels(mut self, channels: usize) -> Self {
        self.dma_channels = channels;
        self
    }

    pub fn with_zero_copy_dual(mut self, zero_copy: bool) -> Self {
        self.zero_copy_dual = zero_copy;
        self
    }
}

/// Settings used by [`DataMover::from_config`](crate::mover::DataMover::from_config).
///
/// ```
/// use hdx::{BackendKind, DataMoverConfig};
///
/// let config = DataMoverConfig::from_json(
///     r#"{ "backend": "xrt", "emulator": { "dma_channels": 4 } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.backend, BackendKind::Xrt);
/// assert_eq!(config.emulator.dma_channels, 4);
/// assert!(!config.emulator.zero_copy_dual);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMoverConfig {
    pub backend: BackendKind,
    pub emulator: EmulatorConfig,
}

impl Default for DataMoverConfig {
    fn default() -> Self {
        DataMoverConfig {
            backend: BackendKind::None,
            emulator: EmulatorConfig::default(),
        }
    }
}

impl DataMoverConfig {
    /// Parses and validates a JSON configuration. Missing fields take their
    /// default values.
    pub fn from_json(json: &str) -> Result<DataMoverConfig> {
        let config: DataMoverConfig = serde_json::from_str(json)
            .map_err(|e| Error::invalid_arg("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::invalid_arg("config", e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.emulator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DataMoverConfig::default();
        assert_eq!(config.backend, BackendKind::None);
        assert_eq!(config.emulator.device_memory_bytes, 256 * 1024 * 1024);
        assert_eq!(config.emulator.dma_channels, 2);
        assert!(config.emulator.pin_host_buffers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = DataMoverConfig::from_json(r#"{ "backend": "none" }"#).unwrap();
        assert_eq!(config, DataMoverConfig::default());

        let config = DataMoverConfig::from_json(
            r#"{ "emulator": { "device_memory_bytes": 4096, "zero_copy_dual": true } }"#,
        )
        .unwrap();
        assert_eq!(config.emulator.device_memory_bytes, 4096);
        assert!(config.emulator.zero_copy_dual);
        assert_eq!(config.emulator.max_queued_transfers, 4096);
    }

    #[test]
    fn test_json_round_trip() {
        let config = DataMoverConfig {
            backend: BackendKind::Xrt,
            emulator: EmulatorConfig::default().with_dma_channels(3),
        };
        let json = config.to_json().unwrap();
        assert_eq!(DataMoverConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid() {
        let err = DataMoverConfig::from_json(r#"{ "backend": "cuda" }"#).unwrap_err();
        assert!(matches!(err.kind(), hdx_common::error::ErrorKind::InvalidArgument { .. }));

        let err = DataMoverConfig::from_json(r#"{ "emulator": { "dma_channels": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err.kind(), hdx_common::error::ErrorKind::InvalidArgument { .. }));

        assert!(EmulatorConfig::default().with_device_memory(0).validate().is_err());
    }
}
