//! `Memory`: one allocated region with its host/device handles.
//!
//! Regions are created only through a factory ([`Memory::create`],
//! [`Registry::create_memory`] or `DataMover::get_buffer`) and shared as
//! `Arc<Memory>`. The address handles are reachable from inside the crate only;
//! callers move contents with `write_host`/`read_host` on the host side and with
//! `sync` or the mover's `upload`/`download` across the boundary.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use hdx_common::{Result, ensure_state, error::Error, verify_size};

use crate::{
    address::{DeviceAddress, HostAddress},
    driver::{CopyJob, Driver, Region},
    enums::{BackendKind, MemoryType, SyncType},
    registry::Registry,
};

pub struct Memory {
    id: u64,
    size: usize,
    memory_type: MemoryType,
    host: Option<HostAddress>,
    device: Option<DeviceAddress>,
    driver: Arc<dyn Driver>,
}

impl Memory {
    /// Creates a region bound to `kind` from existing address handles, using the
    /// global registry.
    ///
    /// For the `none` kind the handles are ignored and a host-resident region of
    /// `size` bytes is allocated instead. For other kinds, at least one handle
    /// is required and each supplied handle must hold at least `size` bytes.
    /// The placement is inferred from the handles: both sides make a `Dual`
    /// region when they alias one backing or the host pages are pinned and a
    /// `Cacheable` one otherwise.
    ///
    /// # Errors
    ///
    /// `InvalidSize` for a zero or oversized `size`, `UnsupportedBackend` when
    /// `kind` is not registered, `InvalidState` when no handle is supplied.
    pub fn create(
        kind: BackendKind,
        size: usize,
        host: Option<HostAddress>,
        device: Option<DeviceAddress>,
    ) -> Result<Arc<Memory>> {
        Registry::global().create_memory(kind, size, host, device)
    }

    /// Builds a region over handles reserved by `driver`.
    pub(crate) fn from_region(
        driver: Arc<dyn Driver>,
        size: usize,
        memory_type: MemoryType,
        region: Region,
    ) -> Result<Arc<Memory>> {
        verify_size!(size, size != 0);
        ensure_state!(
            region.host.is_some() == memory_type.has_host()
                && region.device.is_some() == memory_type.has_device(),
            "create",
            "{memory_type:?} region does not match the supplied address handles"
        );
        if let Some(host) = &region.host {
            verify_size!(size, size <= host.len());
        }
        if let Some(device) = &region.device {
            verify_size!(size, size <= device.len());
        }

        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Ok(Arc::new(Memory {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            size,
            memory_type,
            host: region.host,
            device: region.device,
            driver,
        }))
    }

    /// Builds a region over caller-supplied handles, inferring the placement.
    pub(crate) fn from_handles(
        driver: Arc<dyn Driver>,
        size: usize,
        host: Option<HostAddress>,
        device: Option<DeviceAddress>,
    ) -> Result<Arc<Memory>> {
        let memory_type = match (&host, &device) {
            (Some(h), Some(d)) if h.aliases(d) || h.segment().is_pinned() => MemoryType::Dual,
            (Some(_), Some(_)) => MemoryType::Cacheable,
            (Some(_), None) => MemoryType::Host,
            (None, Some(_)) => MemoryType::Device,
            (None, None) => {
                return Err(Error::invalid_state(
                    "create",
                    "at least one address handle is required",
                ));
            }
        };
        Memory::from_region(driver, size, memory_type, Region { host, device })
    }

    /// Pushes (`HostToDevice`) or pulls (`DeviceToHost`) the whole region across
    /// the address-space boundary, blocking until the runtime confirms it.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the placement lacks either side, `BackendError` if
    /// the runtime transaction fails.
    pub fn sync(&self, direction: SyncType) -> Result<()> {
        let job = self.copy_job(direction, self.size, "sync")?;
        log::trace!("memory {}: sync {direction}", self.id);
        self.driver.copy(job)
    }

    /// Size of the region in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.driver.kind()
    }

    /// Whether host and device handles share one physical backing.
    pub fn is_zero_copy(&self) -> bool {
        match (&self.host, &self.device) {
            (Some(host), Some(device)) => host.aliases(device),
            _ => false,
        }
    }

    /// Copies `data` into the host side at `offset`.
    ///
    /// # Errors
    ///
    /// `InvalidState` for a region without a host side, `InvalidSize` when the
    /// write does not fit.
    pub fn write_host(&self, offset: usize, data: &[u8]) -> Result<()> {
        let host = self.host_side("write_host")?;
        let end = self.host_range_end("write_host", offset, data.len())?;
        host.segment().lock()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copies typed values into the host side at byte `offset`.
    pub fn write_host_pod<T>(&self, offset: usize, values: &[T]) -> Result<()>
    where
        T: bytemuck::NoUninit,
    {
        self.write_host(offset, bytemuck::cast_slice(values))
    }

    /// Copies host-side bytes starting at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// `InvalidState` for a region without a host side, `InvalidSize` when the
    /// read does not fit.
    pub fn read_host(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let host = self.host_side("read_host")?;
        let end = self.host_range_end("read_host", offset, out.len())?;
        out.copy_from_slice(&host.segment().lock()[offset..end]);
        Ok(())
    }

    /// Returns a copy of the whole host side.
    pub fn host_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.size];
        self.read_host(0, &mut out)?;
        Ok(out)
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn host_address(&self) -> Option<&HostAddress> {
        self.host.as_ref()
    }

    #[inline]
    pub(crate) fn device_address(&self) -> Option<&DeviceAddress> {
        self.device.as_ref()
    }

    /// Validates a transfer of the first `len` bytes in `direction` and builds
    /// the driver job for it.
    pub(crate) fn copy_job(
        &self,
        direction: SyncType,
        len: usize,
        operation: &str,
    ) -> Result<CopyJob> {
        let (host, device) = match (self.host_address(), self.device_address()) {
            (Some(host), Some(device)) => (host.clone(), device.clone()),
            (None, _) => {
                return Err(Error::invalid_state(
                    operation,
                    format!(
                        "{:?} region has no host side for a {direction} transfer",
                        self.memory_type
                    ),
                ));
            }
            (_, None) => {
                return Err(Error::invalid_state(
                    operation,
                    format!(
                        "{:?} region has no device side for a {direction} transfer",
                        self.memory_type
                    ),
                ));
            }
        };
        if len == 0 || len > self.size {
            return Err(Error::invalid_size(
                operation,
                format!("{len} bytes requested, region holds {}", self.size),
            ));
        }
        Ok(CopyJob {
            direction,
            host,
            device,
            len,
        })
    }

    fn host_side(&self, operation: &str) -> Result<&HostAddress> {
        self.host.as_ref().ok_or_else(|| {
            Error::invalid_state(
                operation,
                format!("{:?} region has no host side", self.memory_type),
            )
        })
    }

    fn host_range_end(&self, operation: &str, offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                Error::invalid_size(
                    operation,
                    format!("range {offset}+{len} exceeds region of {} bytes", self.size),
                )
            })
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("memory_type", &self.memory_type)
            .field("backend", &self.backend_kind())
            .field("zero_copy", &self.is_zero_copy())
            .finish()
    }
}
