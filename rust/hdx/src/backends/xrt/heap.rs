//! Device heap accounting.
//!
//! The heap is a budget of device bytes. Reserving withdraws from it with a
//! compare-and-exchange loop that never drives the remaining amount below
//! zero; dropping the returned [`HeapReservation`] deposits the bytes back.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use hdx_common::{Result, error::Error};

pub struct DeviceHeap {
    capacity: u64,
    available: AtomicU64,
}

impl DeviceHeap {
    pub fn new(capacity: u64) -> Arc<DeviceHeap> {
        Arc::new(DeviceHeap {
            capacity,
            available: AtomicU64::new(capacity),
        })
    }

    /// Reserves `bytes` of device memory.
    ///
    /// # Errors
    ///
    /// `AllocationFailure` when fewer than `bytes` remain.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Result<HeapReservation> {
        if self.withdraw(bytes) {
            Ok(HeapReservation {
                heap: self.clone(),
                bytes,
            })
        } else {
            Err(Error::allocation_failure(
                bytes as usize,
                format!(
                    "device heap exhausted: {} of {} bytes available",
                    self.available(),
                    self.capacity
                ),
            ))
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Remaining bytes. Stale by the time the caller looks at it.
    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Relaxed)
    }

    pub fn in_use(&self) -> u64 {
        self.capacity - self.available()
    }

    fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.available.load(Ordering::Relaxed);
        while current >= amount {
            match self.available.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    fn deposit(&self, amount: u64) {
        self.available.fetch_add(amount, Ordering::Release);
    }
}

impl std::fmt::Debug for DeviceHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHeap")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Bytes withdrawn from a [`DeviceHeap`], returned on drop.
#[derive(Debug)]
pub struct HeapReservation {
    heap: Arc<DeviceHeap>,
    bytes: u64,
}

impl HeapReservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for HeapReservation {
    fn drop(&mut self) {
        if self.bytes != 0 {
            self.heap.deposit(self.bytes);
        }
    }
}
