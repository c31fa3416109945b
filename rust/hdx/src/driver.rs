//! The contract between the core and a runtime driver.
//!
//! A driver provides four primitives:
//!
//! 1. reserve a region of a given size and placement, returning opaque host
//!    and/or device address handles ([`Driver::reserve`]);
//! 2. perform a directional copy of N bytes between those handles, blocking
//!    ([`Driver::copy`]);
//! 3. enqueue the same copy and yield a pollable handle ([`Driver::enqueue`]);
//! 4. release a region's resources, which happens when the last address
//!    handle is dropped.
//!
//! Drivers are registered per [`BackendKind`] in the
//! [`Registry`](crate::registry::Registry) and shared as `Arc<dyn Driver>`.

use hdx_common::{Result, error::Error};

use crate::{
    address::{DeviceAddress, HostAddress},
    completion::PendingCopy,
    enums::{BackendKind, MemoryType, SyncType},
};

/// Address handles produced by [`Driver::reserve`]. Host-only and device-only
/// placements leave the other side empty.
#[derive(Debug, Clone)]
pub struct Region {
    pub host: Option<HostAddress>,
    pub device: Option<DeviceAddress>,
}

impl Region {
    pub fn dual(host: HostAddress, device: DeviceAddress) -> Region {
        Region {
            host: Some(host),
            device: Some(device),
        }
    }

    pub fn host_only(host: HostAddress) -> Region {
        Region {
            host: Some(host),
            device: None,
        }
    }

    pub fn device_only(device: DeviceAddress) -> Region {
        Region {
            host: None,
            device: Some(device),
        }
    }
}

/// A directional copy of the first `len` bytes between a host and a device
/// handle.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub direction: SyncType,
    pub host: HostAddress,
    pub device: DeviceAddress,
    pub len: usize,
}

impl CopyJob {
    /// Key that orders copies: jobs with the same key must complete in issue
    /// order.
    #[inline]
    pub fn ordering_key(&self) -> u64 {
        self.device.segment().id()
    }

    /// Whether the copy is a no-op because both handles share one backing.
    #[inline]
    pub fn is_zero_copy(&self) -> bool {
        self.host.aliases(&self.device)
    }

    /// Performs the copy on the calling thread.
    ///
    /// The two segments are locked in ascending id order, whichever side each
    /// one plays, so copies over segments shared by several regions cannot
    /// deadlock.
    pub fn execute(&self, backend: &'static str) -> Result<()> {
        if self.is_zero_copy() {
            return Ok(());
        }
        let len = self.len;
        if len > self.host.len() || len > self.device.len() {
            return Err(Error::backend(
                backend,
                format!(
                    "copy of {len} bytes exceeds segment bounds (host {}, device {})",
                    self.host.len(),
                    self.device.len()
                ),
            ));
        }
        let (host_segment, device_segment) = (self.host.segment(), self.device.segment());
        let (mut host, mut device) = if host_segment.id() < device_segment.id() {
            let host = host_segment.lock();
            (host, device_segment.lock())
        } else {
            let device = device_segment.lock();
            (host_segment.lock(), device)
        };
        match self.direction {
            SyncType::HostToDevice => device[..len].copy_from_slice(&host[..len]),
            SyncType::DeviceToHost => host[..len].copy_from_slice(&device[..len]),
        }
        Ok(())
    }
}

/// A runtime driver bound to one [`BackendKind`].
pub trait Driver: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Whether the driver can reserve regions of the given placement.
    fn supports(&self, memory_type: MemoryType) -> bool {
        let _ = memory_type;
        true
    }

    /// Reserves a region of `size` bytes.
    ///
    /// Fails with `AllocationFailure` when the memory cannot be reserved.
    fn reserve(&self, size: usize, memory_type: MemoryType) -> Result<Region>;

    /// Queues a copy and returns immediately.
    ///
    /// Copies sharing an [`ordering_key`](CopyJob::ordering_key) complete in the
    /// order they were enqueued. Fails with `BackendError` when the copy cannot
    /// be queued at all; failures during execution are reported through the
    /// returned handle.
    fn enqueue(&self, job: CopyJob) -> Result<PendingCopy>;

    /// Performs a copy and blocks until it completes.
    fn copy(&self, job: CopyJob) -> Result<()> {
        self.enqueue(job)?.join()
    }
}
