//! Backend kind to driver mapping.
//!
//! The process-wide registry returned by [`Registry::global`] is built lazily
//! with [`Registry::with_defaults`]. Tests and embedders can build private
//! registries and register their own drivers.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use hdx_common::{Result, error::Error, verify_size};

use crate::{
    address::{AddressSpace, DeviceAddress, HostAddress},
    backends::none::NoneDriver,
    driver::Driver,
    enums::{BackendKind, MemoryType},
    memory::Memory,
    mover::DataMover,
};

pub struct Registry {
    drivers: RwLock<HashMap<BackendKind, Arc<dyn Driver>>>,
}

impl Registry {
    /// A registry holding only the `none` driver.
    pub fn new() -> Registry {
        let registry = Registry {
            drivers: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(NoneDriver::new()));
        registry
    }

    /// A registry holding every driver compiled into the crate.
    ///
    /// A driver that fails to start is logged and left out; requests for its
    /// kind then fail with `UnsupportedBackend`.
    pub fn with_defaults() -> Registry {
        let registry = Registry::new();
        #[cfg(feature = "xrt")]
        match crate::backends::xrt::XrtDriver::new(Default::default()) {
            Ok(driver) => registry.register(Arc::new(driver)),
            Err(e) => log::error!("xrt backend unavailable: {e}"),
        }
        registry
    }

    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::with_defaults)
    }

    /// Registers `driver` under its kind, replacing any previous driver.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let kind = driver.kind();
        if self.drivers.write().unwrap().insert(kind, driver).is_some() {
            log::debug!("replaced driver for backend {kind}");
        }
    }

    /// # Errors
    ///
    /// `UnsupportedBackend` when no driver is registered for `kind`.
    pub fn driver(&self, kind: BackendKind) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .unwrap()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::unsupported_backend(kind.name()))
    }

    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.drivers.read().unwrap().contains_key(&kind)
    }

    /// Registered kinds in ascending order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds = self.drivers.read().unwrap().keys().copied().collect::<Vec<_>>();
        kinds.sort();
        kinds
    }

    pub fn create_data_mover(&self, kind: BackendKind) -> Result<DataMover> {
        Ok(DataMover::with_driver(self.driver(kind)?))
    }

    /// See [`Memory::create`].
    pub fn create_memory(
        &self,
        kind: BackendKind,
        size: usize,
        host: Option<HostAddress>,
        device: Option<DeviceAddress>,
    ) -> Result<Arc<Memory>> {
        let driver = self.driver(kind)?;
        verify_size!(size, size != 0);
        if kind == BackendKind::None {
            let region = driver.reserve(size, MemoryType::Dual)?;
            return Memory::from_region(driver, size, MemoryType::Dual, region);
        }
        if let Some(host) = &host {
            if host.segment().space() != AddressSpace::Host {
                return Err(Error::invalid_state(
                    "create",
                    "host handle refers to device memory",
                ));
            }
        }
        Memory::from_handles(driver, size, host, device)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::SyncType;

    #[test]
    fn test_new_has_only_none() {
        let registry = Registry::new();
        assert_eq!(registry.kinds(), vec![BackendKind::None]);
        assert!(!registry.is_registered(BackendKind::Xrt));
        let err = registry.driver(BackendKind::Xrt).err().unwrap();
        assert!(err.is_unsupported_backend());
        assert!(registry.create_data_mover(BackendKind::Xrt).is_err());
    }

    #[cfg(feature = "xrt")]
    #[test]
    fn test_defaults_include_xrt() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.kinds(), vec![BackendKind::None, BackendKind::Xrt]);
        assert!(Registry::global().is_registered(BackendKind::Xrt));
    }

    #[test]
    fn test_create_memory_none_ignores_handles() {
        let registry = Registry::new();
        let mem = registry.create_memory(BackendKind::None, 128, None, None).unwrap();
        assert_eq!(mem.size(), 128);
        assert_eq!(mem.memory_type(), MemoryType::Dual);
        assert_eq!(mem.backend_kind(), BackendKind::None);
        mem.sync(SyncType::HostToDevice).unwrap();

        let err = registry.create_memory(BackendKind::None, 0, None, None).unwrap_err();
        assert!(err.is_invalid_size());
    }

    #[cfg(feature = "xrt")]
    #[test]
    fn test_create_memory_from_driver_handles() {
        let registry = Registry::with_defaults();
        let driver = registry.driver(BackendKind::Xrt).unwrap();
        let region = driver.reserve(256, MemoryType::Cacheable).unwrap();
        let mem = registry
            .create_memory(BackendKind::Xrt, 200, region.host, region.device)
            .unwrap();
        assert_eq!(mem.size(), 200);
        assert!(mem.memory_type().has_host() && mem.memory_type().has_device());

        let err = registry
            .create_memory(BackendKind::Xrt, 16, None, None)
            .unwrap_err();
        assert!(err.is_invalid_state());
    }
}
