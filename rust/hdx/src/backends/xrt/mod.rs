//! Emulated XRT runtime.
//!
//! The device address space is kept in its own page allocations, separate from
//! host memory, and every device-side byte is charged against a bounded
//! [`DeviceHeap`]. Copies between the two spaces go through the [`DmaEngine`].
//!
//! Placement mapping:
//!
//! | placement | host side                 | device side            |
//! |-----------|---------------------------|------------------------|
//! | Dual      | pinned (or aliased)       | heap pages (or alias)  |
//! | Cacheable | pageable                  | heap pages             |
//! | Host      | pageable                  | none                   |
//! | Device    | none                      | heap pages             |
//!
//! With `zero_copy_dual` set, a `Dual` region is a single pinned backing that
//! both handles refer to; it is still charged to the device heap.

use std::sync::Arc;

use hdx_common::{Result, error::Error};
use hdx_page_alloc::PageBuffer;

use crate::{
    address::{AddressSpace, DeviceAddress, HostAddress, ReleaseGuard, Segment},
    backends::pageable,
    completion::PendingCopy,
    config::EmulatorConfig,
    driver::{CopyJob, Driver, Region},
    enums::{BackendKind, MemoryType},
};

pub mod engine;
pub mod heap;

pub use engine::DmaEngine;
pub use heap::{DeviceHeap, HeapReservation};

#[derive(Debug)]
pub struct XrtDriver {
    config: EmulatorConfig,
    heap: Arc<DeviceHeap>,
    engine: DmaEngine,
}

impl XrtDriver {
    pub fn new(config: EmulatorConfig) -> Result<XrtDriver> {
        config.validate()?;
        let heap = DeviceHeap::new(config.device_memory_bytes as u64);
        let engine = DmaEngine::new(config.dma_channels, config.max_queued_transfers)?;
        log::debug!(
            "xrt: device heap {} bytes, {} DMA channels, zero-copy dual: {}",
            config.device_memory_bytes,
            config.dma_channels,
            config.zero_copy_dual
        );
        Ok(XrtDriver {
            config,
            heap,
            engine,
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Device heap bytes held by live regions.
    pub fn device_memory_in_use(&self) -> u64 {
        self.heap.in_use()
    }

    /// Copies queued on the DMA engine and not yet finished.
    pub fn queued_copies(&self) -> usize {
        self.engine.queued()
    }

    fn device_segment(&self, size: usize) -> Result<Segment> {
        let reservation = self.heap.reserve(size as u64)?;
        let pages = PageBuffer::allocate_with_fallback(size)
            .map_err(|e| Error::allocation_io(size, e))?;
        let guard: ReleaseGuard = Box::new(reservation);
        Ok(Segment::with_guard(AddressSpace::Device, pages, Some(guard)))
    }

    fn dual_host_pages(&self, size: usize) -> Result<PageBuffer> {
        let pages = if self.config.pin_host_buffers {
            PageBuffer::allocate_pinned_or_pageable(size)
        } else {
            PageBuffer::allocate_pageable(size)
        };
        pages.map_err(|e| Error::allocation_io(size, e))
    }
}

impl Driver for XrtDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Xrt
    }

    fn reserve(&self, size: usize, memory_type: MemoryType) -> Result<Region> {
        let region = match memory_type {
            MemoryType::Dual if self.config.zero_copy_dual => {
                let reservation = self.heap.reserve(size as u64)?;
                let guard: ReleaseGuard = Box::new(reservation);
                let host = HostAddress::new(Segment::with_guard(
                    AddressSpace::Host,
                    self.dual_host_pages(size)?,
                    Some(guard),
                ));
                let device = host.alias_as_device();
                Region::dual(host, device)
            }
            MemoryType::Dual => {
                let device = DeviceAddress::new(self.device_segment(size)?);
                let host =
                    HostAddress::new(Segment::new(AddressSpace::Host, self.dual_host_pages(size)?));
                Region::dual(host, device)
            }
            MemoryType::Cacheable => {
                let device = DeviceAddress::new(self.device_segment(size)?);
                let host = HostAddress::new(Segment::new(AddressSpace::Host, pageable(size)?));
                Region::dual(host, device)
            }
            MemoryType::Host => {
                Region::host_only(HostAddress::new(Segment::new(
                    AddressSpace::Host,
                    pageable(size)?,
                )))
            }
            MemoryType::Device => Region::device_only(DeviceAddress::new(self.device_segment(size)?)),
        };
        log::trace!(
            "xrt: reserved {size} bytes as {memory_type:?}, heap in use {}",
            self.heap.in_use()
        );
        Ok(region)
    }

    fn enqueue(&self, job: CopyJob) -> Result<PendingCopy> {
        self.engine.submit(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::SyncType;
    use hdx_common::error::ErrorKind;

    fn driver(device_memory: usize) -> XrtDriver {
        XrtDriver::new(EmulatorConfig::default().with_device_memory(device_memory)).unwrap()
    }

    #[test]
    fn test_reserve_placements() {
        let xrt = driver(1 << 20);
        let dual = xrt.reserve(4096, MemoryType::Dual).unwrap();
        let (host, device) = (dual.host.unwrap(), dual.device.unwrap());
        assert!(!host.aliases(&device));
        assert_eq!(device.segment().space(), AddressSpace::Device);
        assert_eq!(xrt.device_memory_in_use(), 4096);

        let host_only = xrt.reserve(100, MemoryType::Host).unwrap();
        assert!(host_only.device.is_none());
        assert_eq!(xrt.device_memory_in_use(), 4096);

        let device_only = xrt.reserve(100, MemoryType::Device).unwrap();
        assert!(device_only.host.is_none());
        assert_eq!(xrt.device_memory_in_use(), 4196);

        drop((host, device, device_only));
        assert_eq!(xrt.device_memory_in_use(), 0);
    }

    #[test]
    fn test_heap_exhaustion() {
        let xrt = driver(8192);
        let _a = xrt.reserve(8000, MemoryType::Cacheable).unwrap();
        let err = xrt.reserve(500, MemoryType::Device).unwrap_err();
        match err.kind() {
            ErrorKind::AllocationFailure { size, .. } => assert_eq!(*size, 500),
            other => panic!("unexpected {other:?}"),
        }
        assert!(xrt.reserve(500, MemoryType::Host).is_ok());
    }

    #[test]
    fn test_zero_copy_dual() {
        let xrt =
            XrtDriver::new(EmulatorConfig::default().with_zero_copy_dual(true)).unwrap();
        let region = xrt.reserve(512, MemoryType::Dual).unwrap();
        let (host, device) = (region.host.unwrap(), region.device.unwrap());
        assert!(host.aliases(&device));
        assert_eq!(xrt.device_memory_in_use(), 512);
        drop(host);
        assert_eq!(xrt.device_memory_in_use(), 512);
        drop(device);
        assert_eq!(xrt.device_memory_in_use(), 0);
    }

    #[test]
    fn test_copy_round_trip() {
        let xrt = driver(1 << 20);
        let region = xrt.reserve(64, MemoryType::Cacheable).unwrap();
        let (host, device) = (region.host.unwrap(), region.device.unwrap());
        host.segment().lock().copy_from_slice(&[3u8; 64]);
        xrt.copy(CopyJob {
            direction: SyncType::HostToDevice,
            host: host.clone(),
            device: device.clone(),
            len: 64,
        })
        .unwrap();
        assert!(device.segment().lock().iter().all(|&b| b == 3));
        host.segment().lock().fill(0);
        xrt.copy(CopyJob {
            direction: SyncType::DeviceToHost,
            host: host.clone(),
            device,
            len: 32,
        })
        .unwrap();
        let bytes = host.segment().lock().to_vec();
        assert!(bytes[..32].iter().all(|&b| b == 3));
        assert!(bytes[32..].iter().all(|&b| b == 0));
        assert_eq!(xrt.queued_copies(), 0);
    }
}
