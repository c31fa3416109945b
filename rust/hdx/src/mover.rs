//! `DataMover`: buffer allocation and host/device transfers.
//!
//! Asynchronous transfers are tracked in a per-mover ledger. Each transfer
//! moves through `Issued -> InFlight -> {Completed | Failed}`; the ledger holds
//! the in-flight ones until [`DataMover::sync`] or [`DataMover::get_status`]
//! observes their terminal result. Failures are kept until the next `sync`
//! returns them, so a failed transfer is never lost between polls.
//!
//! Issuing and retiring are serialized by the ledger mutex. Waiting for a
//! transfer happens outside the lock, so a barrier on one thread does not stall
//! issuing or polling on another.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use hdx_common::{Result, error::Error, verify_size};

use crate::{
    backends::none::NoneDriver,
    completion::{Outcome, PendingCopy},
    config::DataMoverConfig,
    driver::Driver,
    enums::{BackendKind, ExecutionType, MemoryType, SyncType},
    memory::Memory,
    registry::Registry,
    status::DeviceStatus,
};

/// Lifecycle of one asynchronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Validated, not yet accepted by the driver.
    Issued,
    /// Accepted by the driver and not yet observed as finished.
    InFlight,
    Completed,
    Failed,
}

struct Transfer {
    id: u64,
    direction: SyncType,
    size: usize,
    memory: Arc<Memory>,
    state: TransferState,
    pending: Option<PendingCopy>,
}

impl Transfer {
    fn finish(&mut self, result: &Result<()>) {
        self.state = if result.is_ok() {
            TransferState::Completed
        } else {
            TransferState::Failed
        };
        log::trace!(
            "transfer {}: {} of {} bytes on memory {} -> {:?}",
            self.id,
            self.direction,
            self.size,
            self.memory.id(),
            self.state
        );
    }
}

#[derive(Default)]
struct TransferLedger {
    in_flight: VecDeque<Transfer>,
    /// Failures observed since the last `sync`, by transfer id.
    failures: Vec<(u64, Error)>,
    completed: u64,
}

impl TransferLedger {
    /// Records the terminal result of transfer `id` and drops it from the
    /// in-flight set.
    fn retire(&mut self, id: u64, result: Result<()>) {
        if let Some(pos) = self.in_flight.iter().position(|t| t.id == id) {
            if let Some(mut transfer) = self.in_flight.remove(pos) {
                transfer.finish(&result);
            }
        }
        match result {
            Ok(()) => self.completed += 1,
            Err(e) => self.failures.push((id, e)),
        }
    }

    /// Polls every in-flight transfer and retires the finished ones.
    fn retire_ready(&mut self) {
        let ready = self
            .in_flight
            .iter()
            .filter_map(|t| match t.pending.as_ref().map(PendingCopy::poll) {
                Some(Outcome::Done(result)) => Some((t.id, result)),
                _ => None,
            })
            .collect::<Vec<_>>();
        for (id, result) in ready {
            self.retire(id, result);
        }
    }

    /// Removes and returns the earliest failure, discarding the rest.
    fn take_failure(&mut self) -> Result<()> {
        let failures = std::mem::take(&mut self.failures);
        if failures.len() > 1 {
            log::warn!("{} transfers failed since the last sync", failures.len());
        }
        match failures.into_iter().min_by_key(|(id, _)| *id) {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct DataMover {
    driver: Arc<dyn Driver>,
    ledger: Mutex<TransferLedger>,
    next_id: AtomicU64,
}

impl DataMover {
    /// Creates a mover for `kind` from the global registry.
    ///
    /// # Errors
    ///
    /// `UnsupportedBackend` when `kind` is not registered.
    pub fn create(kind: BackendKind) -> Result<DataMover> {
        Registry::global().create_data_mover(kind)
    }

    /// Creates a mover with a dedicated driver configured by `config`.
    pub fn from_config(config: &DataMoverConfig) -> Result<DataMover> {
        config.validate()?;
        let driver: Arc<dyn Driver> = match config.backend {
            BackendKind::None => Arc::new(NoneDriver::new()),
            #[cfg(feature = "xrt")]
            BackendKind::Xrt => Arc::new(crate::backends::xrt::XrtDriver::new(
                config.emulator.clone(),
            )?),
            #[cfg(not(feature = "xrt"))]
            kind => return Err(Error::unsupported_backend(kind.name())),
        };
        Ok(DataMover::with_driver(driver))
    }

    pub fn with_driver(driver: Arc<dyn Driver>) -> DataMover {
        log::debug!("data mover bound to backend {}", driver.kind());
        DataMover {
            driver,
            ledger: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.driver.kind()
    }

    /// Allocates a region of `size` bytes with the given placement.
    ///
    /// # Errors
    ///
    /// `InvalidSize` for a zero `size`, `InvalidState` when the backend cannot
    /// provide the placement, `AllocationFailure` when the memory cannot be
    /// reserved.
    pub fn get_buffer(&self, size: usize, memory_type: MemoryType) -> Result<Arc<Memory>> {
        verify_size!(size, size != 0);
        if !self.driver.supports(memory_type) {
            return Err(Error::invalid_state(
                "get_buffer",
                format!(
                    "backend {} does not provide {memory_type:?} placement",
                    self.backend_kind()
                ),
            ));
        }
        let region = self.driver.reserve(size, memory_type)?;
        Memory::from_region(self.driver.clone(), size, memory_type, region)
    }

    /// Copies the first `size` bytes of `memory` from host to device.
    pub fn upload(
        &self,
        memory: &Arc<Memory>,
        size: usize,
        execution: ExecutionType,
    ) -> Result<()> {
        self.transfer(memory, SyncType::HostToDevice, size, execution, "upload")
    }

    /// Copies the first `size` bytes of `memory` from device to host.
    pub fn download(
        &self,
        memory: &Arc<Memory>,
        size: usize,
        execution: ExecutionType,
    ) -> Result<()> {
        self.transfer(memory, SyncType::DeviceToHost, size, execution, "download")
    }

    /// Blocks until every asynchronous transfer issued before the call has
    /// finished, then reports the earliest failure observed since the previous
    /// `sync`.
    ///
    /// All outstanding transfers are drained even when one of them fails.
    pub fn sync(&self) -> Result<()> {
        for (id, pending) in self.snapshot() {
            if let Some(result) = pending.wait() {
                self.ledger.lock().unwrap().retire(id, result);
            }
        }
        self.ledger.lock().unwrap().take_failure()
    }

    /// Like [`sync`](Self::sync), giving up after `timeout`.
    ///
    /// Returns `Ok(false)` when the deadline passes first. Transfers still
    /// running stay outstanding; a later `get_status` or `sync` retires them,
    /// and any failure seen so far is kept for that later `sync`. A timeout too
    /// large to express as a deadline waits like `sync`.
    pub fn sync_timeout(&self, timeout: Duration) -> Result<bool> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.sync().map(|()| true);
        };
        for (id, pending) in self.snapshot() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match pending.wait_timeout(remaining) {
                Outcome::Done(result) => self.ledger.lock().unwrap().retire(id, result),
                Outcome::Retired => (),
                Outcome::Pending => return Ok(false),
            }
        }
        self.ledger.lock().unwrap().take_failure()?;
        Ok(true)
    }

    /// Non-blocking status of the asynchronous transfers issued by this mover.
    ///
    /// Finished transfers are retired as a side effect; their failures are
    /// reported by the next `sync`.
    pub fn get_status(&self) -> DeviceStatus {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.retire_ready();
        DeviceStatus::new(ledger.in_flight.len(), ledger.failures.len())
    }

    /// Number of asynchronous transfers on `memory` not yet retired.
    pub fn in_flight_for(&self, memory: &Memory) -> usize {
        self.ledger
            .lock()
            .unwrap()
            .in_flight
            .iter()
            .filter(|t| t.memory.id() == memory.id())
            .count()
    }

    /// Number of asynchronous transfers that completed successfully over the
    /// mover's lifetime.
    pub fn completed_transfers(&self) -> u64 {
        self.ledger.lock().unwrap().completed
    }

    fn transfer(
        &self,
        memory: &Arc<Memory>,
        direction: SyncType,
        size: usize,
        execution: ExecutionType,
        operation: &str,
    ) -> Result<()> {
        if memory.backend_kind() != self.backend_kind() {
            return Err(Error::invalid_state(
                operation,
                format!(
                    "memory belongs to backend {}, mover to {}",
                    memory.backend_kind(),
                    self.backend_kind()
                ),
            ));
        }
        let job = memory.copy_job(direction, size, operation)?;

        match execution {
            ExecutionType::Sync => self.driver.copy(job),
            ExecutionType::Async => {
                let mut transfer = Transfer {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    direction,
                    size,
                    memory: memory.clone(),
                    state: TransferState::Issued,
                    pending: None,
                };
                // Enqueue under the lock so that ledger order matches issue order.
                let mut ledger = self.ledger.lock().unwrap();
                transfer.pending = Some(self.driver.enqueue(job)?);
                transfer.state = TransferState::InFlight;
                log::trace!(
                    "transfer {}: {direction} of {size} bytes on memory {} in flight",
                    transfer.id,
                    memory.id()
                );
                ledger.in_flight.push_back(transfer);
                Ok(())
            }
        }
    }

    /// Pending handles of the transfers in flight right now, in issue order.
    fn snapshot(&self) -> Vec<(u64, PendingCopy)> {
        self.ledger
            .lock()
            .unwrap()
            .in_flight
            .iter()
            .filter_map(|t| t.pending.clone().map(|p| (t.id, p)))
            .collect()
    }
}

impl Drop for DataMover {
    fn drop(&mut self) {
        let ledger = self.ledger.get_mut().unwrap_or_else(|e| e.into_inner());
        if !ledger.in_flight.is_empty() || !ledger.failures.is_empty() {
            log::debug!(
                "data mover dropped with {} transfers in flight and {} unreported failures",
                ledger.in_flight.len(),
                ledger.failures.len()
            );
        }
    }
}

impl std::fmt::Debug for DataMover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMover")
            .field("backend", &self.backend_kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DeviceState;

    fn none_mover() -> DataMover {
        DataMover::with_driver(Arc::new(NoneDriver::new()))
    }

    #[test]
    fn test_get_buffer_sizes() {
        let mover = none_mover();
        for memory_type in MemoryType::ALL {
            let mem = mover.get_buffer(1000, memory_type).unwrap();
            assert_eq!(mem.size(), 1000);
            assert_eq!(mem.memory_type(), memory_type);
        }
        assert!(mover.get_buffer(0, MemoryType::Dual).unwrap_err().is_invalid_size());
    }

    #[test]
    fn test_transfer_validation() {
        let mover = none_mover();
        let mem = mover.get_buffer(64, MemoryType::Dual).unwrap();
        let err = mover.upload(&mem, 65, ExecutionType::Sync).unwrap_err();
        assert!(err.is_invalid_size());
        let err = mover.download(&mem, 0, ExecutionType::Async).unwrap_err();
        assert!(err.is_invalid_size());

        let host = mover.get_buffer(64, MemoryType::Host).unwrap();
        assert!(mover.upload(&host, 64, ExecutionType::Sync).unwrap_err().is_invalid_state());
        let device = mover.get_buffer(64, MemoryType::Device).unwrap();
        assert!(
            mover
                .download(&device, 64, ExecutionType::Async)
                .unwrap_err()
                .is_invalid_state()
        );
        assert!(mover.get_status().is_idle());
    }

    #[test]
    fn test_async_retired_by_status() {
        let mover = none_mover();
        let mem = mover.get_buffer(64, MemoryType::Cacheable).unwrap();
        mover.upload(&mem, 64, ExecutionType::Async).unwrap();
        mover.download(&mem, 32, ExecutionType::Async).unwrap();
        assert_eq!(mover.in_flight_for(&mem), 2);

        let status = mover.get_status();
        assert_eq!(status.state, DeviceState::Idle);
        assert_eq!(mover.in_flight_for(&mem), 0);
        assert_eq!(mover.completed_transfers(), 2);
        mover.sync().unwrap();
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mover = none_mover();
        for _ in 0..3 {
            mover.sync().unwrap();
            assert!(mover.sync_timeout(Duration::ZERO).unwrap());
            assert!(mover.get_status().is_idle());
        }
    }

    #[test]
    fn test_sync_timeout_unbounded() {
        let mover = none_mover();
        assert!(mover.sync_timeout(Duration::MAX).unwrap());

        let mem = mover.get_buffer(32, MemoryType::Cacheable).unwrap();
        mover.upload(&mem, 32, ExecutionType::Async).unwrap();
        mover.download(&mem, 32, ExecutionType::Async).unwrap();
        assert!(mover.sync_timeout(Duration::MAX).unwrap());
        assert!(mover.get_status().is_idle());
        assert_eq!(mover.completed_transfers(), 2);
    }

    #[test]
    fn test_ledger_reports_earliest_failure() {
        let mut ledger = TransferLedger::default();
        ledger.retire(7, Err(Error::backend("none", "second")));
        ledger.retire(3, Err(Error::backend("none", "first")));
        ledger.retire(5, Ok(()));
        let err = ledger.take_failure().unwrap_err();
        assert!(err.to_string().contains("first"));
        assert!(ledger.take_failure().is_ok());
        assert_eq!(ledger.completed, 1);
    }
}
