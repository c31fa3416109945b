//! Placement, execution and direction enumerations shared by every backend.

use std::{fmt, str::FromStr};

use hdx_common::error::Error;
use serde::{Deserialize, Serialize};

/// Placement of a region across the host and device address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Pinned, contiguous host memory paired with device memory. Zero-copy when
    /// the backend can alias both sides onto one backing.
    Dual,
    /// Pageable host memory mirrored on the device; coherence requires an
    /// explicit `sync`.
    Cacheable,
    /// Host memory only.
    Host,
    /// Device memory only.
    Device,
}

impl MemoryType {
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Dual,
        MemoryType::Cacheable,
        MemoryType::Host,
        MemoryType::Device,
    ];

    /// Whether regions of this placement carry a host-side handle.
    #[inline]
    pub fn has_host(self) -> bool {
        !matches!(self, MemoryType::Device)
    }

    /// Whether regions of this placement carry a device-side handle.
    #[inline]
    pub fn has_device(self) -> bool {
        !matches!(self, MemoryType::Host)
    }
}

/// Whether a transfer blocks the caller until the backend confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Sync,
    Async,
}

/// Direction of a coherence operation or transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    HostToDevice,
    DeviceToHost,
}

impl SyncType {
    pub fn name(self) -> &'static str {
        match self {
            SyncType::HostToDevice => "host-to-device",
            SyncType::DeviceToHost => "device-to-host",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime implementation a region or mover is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No runtime: regions are purely host-resident and transfers are no-ops.
    None,
    /// Xilinx runtime style accelerator.
    Xrt,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Xrt => "xrt",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(BackendKind::None),
            "xrt" => Ok(BackendKind::Xrt),
            _ => Err(Error::invalid_arg("backend", format!("unknown backend '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_sides() {
        assert!(MemoryType::Dual.has_host() && MemoryType::Dual.has_device());
        assert!(MemoryType::Cacheable.has_host() && MemoryType::Cacheable.has_device());
        assert!(MemoryType::Host.has_host() && !MemoryType::Host.has_device());
        assert!(!MemoryType::Device.has_host() && MemoryType::Device.has_device());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("XRT".parse::<BackendKind>().unwrap(), BackendKind::Xrt);
        assert_eq!("none".parse::<BackendKind>().unwrap(), BackendKind::None);
        assert!("cuda".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Xrt.to_string(), "xrt");
    }
}
