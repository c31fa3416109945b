//! The `none` backend: no accelerator runtime.
//!
//! Every placement is satisfied from host memory. Regions with a device side
//! get a device handle that aliases the host pages, so transfers are no-ops
//! that complete before `enqueue` returns.

use hdx_common::Result;

use crate::{
    address::{AddressSpace, HostAddress, Segment},
    backends::pageable,
    completion::{self, PendingCopy},
    driver::{CopyJob, Driver, Region},
    enums::{BackendKind, MemoryType},
};

#[derive(Debug, Default)]
pub struct NoneDriver;

impl NoneDriver {
    pub fn new() -> NoneDriver {
        NoneDriver
    }
}

impl Driver for NoneDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn reserve(&self, size: usize, memory_type: MemoryType) -> Result<Region> {
        let host = HostAddress::new(Segment::new(AddressSpace::Host, pageable(size)?));
        let region = match memory_type {
            MemoryType::Dual | MemoryType::Cacheable => {
                let device = host.alias_as_device();
                Region::dual(host, device)
            }
            MemoryType::Host => Region::host_only(host),
            MemoryType::Device => Region::device_only(host.alias_as_device()),
        };
        log::trace!("none: reserved {size} bytes as {memory_type:?}");
        Ok(region)
    }

    fn enqueue(&self, job: CopyJob) -> Result<PendingCopy> {
        let name = self.kind().name();
        Ok(completion::ready(name, job.execute(name)))
    }

    fn copy(&self, job: CopyJob) -> Result<()> {
        job.execute(self.kind().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{completion::Outcome, enums::SyncType};

    #[test]
    fn test_reserve_aliases_device_side() {
        let driver = NoneDriver::new();
        for memory_type in MemoryType::ALL {
            let region = driver.reserve(100, memory_type).unwrap();
            assert_eq!(region.host.is_some(), memory_type.has_host());
            assert_eq!(region.device.is_some(), memory_type.has_device());
            if let (Some(host), Some(device)) = (&region.host, &region.device) {
                assert!(host.aliases(device));
                assert_eq!(host.len(), 100);
            }
        }
    }

    #[test]
    fn test_enqueue_completes_inline() {
        let driver = NoneDriver::new();
        let region = driver.reserve(16, MemoryType::Dual).unwrap();
        let job = CopyJob {
            direction: SyncType::HostToDevice,
            host: region.host.unwrap(),
            device: region.device.unwrap(),
            len: 16,
        };
        let pending = driver.enqueue(job).unwrap();
        assert!(!pending.is_pending());
        assert!(matches!(pending.poll(), Outcome::Done(Ok(()))));
        assert!(matches!(pending.poll(), Outcome::Retired));
    }
}
