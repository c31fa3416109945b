//! DMA engine of the emulated runtime.
//!
//! The engine owns a fixed set of channels, each a single-threaded rayon pool
//! fed with `spawn_fifo`. A copy is routed to a channel by its ordering key, so
//! all copies touching the same device segment run on the same thread in issue
//! order. Copies on different channels run concurrently.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use hdx_common::{Result, error::Error};

use crate::{
    completion::{self, PendingCopy},
    driver::CopyJob,
};

const BACKEND: &str = "xrt";

pub struct DmaEngine {
    channels: Vec<rayon::ThreadPool>,
    /// Copies accepted but not yet finished, across all channels.
    queued: Arc<AtomicUsize>,
    max_queued: usize,
}

impl DmaEngine {
    pub fn new(num_channels: usize, max_queued: usize) -> Result<DmaEngine> {
        let channels = (0..num_channels.max(1))
            .map(|channel| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(1)
                    .thread_name(move |_| format!("hdx_dma_channel_{channel}"))
                    .build()
                    .map_err(|e| Error::backend_with_source(BACKEND, "cannot start DMA channel", e))
            })
            .collect::<Result<Vec<_>>>()?;
        log::debug!("xrt: started {} DMA channels", channels.len());
        Ok(DmaEngine {
            channels,
            queued: Arc::new(AtomicUsize::new(0)),
            max_queued,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of copies accepted and not yet finished.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Queues `job` on its channel.
    ///
    /// # Errors
    ///
    /// `BackendError` when the queue is full.
    pub fn submit(&self, job: CopyJob) -> Result<PendingCopy> {
        if self.queued.fetch_add(1, Ordering::Relaxed) >= self.max_queued {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::backend(
                BACKEND,
                format!("DMA queue full ({} copies outstanding)", self.max_queued),
            ));
        }

        let channel = self.channel_for(&job);
        let (completer, pending) = completion::pending(BACKEND);
        let queued = self.queued.clone();
        log::trace!(
            "xrt: channel {channel} <- {} of {} bytes",
            job.direction,
            job.len
        );
        self.channels[channel].spawn_fifo(move || {
            let result = job.execute(BACKEND);
            // Release the segment handles before waking waiters.
            drop(job);
            if let Err(e) = &result {
                log::warn!("xrt: DMA copy failed: {e}");
            }
            queued.fetch_sub(1, Ordering::Relaxed);
            completer.complete(result);
        });
        Ok(pending)
    }

    fn channel_for(&self, job: &CopyJob) -> usize {
        (job.ordering_key() % self.channels.len() as u64) as usize
    }
}

impl std::fmt::Debug for DmaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaEngine")
            .field("channels", &self.channels.len())
            .field("queued", &self.queued())
            .field("max_queued", &self.max_queued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::{AddressSpace, DeviceAddress, HostAddress, Segment},
        backends::pageable,
        enums::SyncType,
    };

    fn job(direction: SyncType, host: &HostAddress, device: &DeviceAddress) -> CopyJob {
        CopyJob {
            direction,
            host: host.clone(),
            device: device.clone(),
            len: host.len(),
        }
    }

    #[test]
    fn test_ordered_per_segment() {
        let engine = DmaEngine::new(3, 1024).unwrap();
        let host = HostAddress::new(Segment::new(AddressSpace::Host, pageable(256).unwrap()));
        let device = DeviceAddress::new(Segment::new(AddressSpace::Device, pageable(256).unwrap()));

        host.segment().lock().fill(7);
        let up = engine.submit(job(SyncType::HostToDevice, &host, &device)).unwrap();
        let scratch =
            HostAddress::new(Segment::new(AddressSpace::Host, pageable(256).unwrap()));
        let down = engine
            .submit(job(SyncType::DeviceToHost, &scratch, &device))
            .unwrap();
        down.join().unwrap();
        assert!(!up.is_pending());
        assert!(scratch.segment().lock().iter().all(|&b| b == 7));
        up.join().unwrap();
        assert_eq!(engine.queued(), 0);
    }

    #[test]
    fn test_queue_limit() {
        let engine = DmaEngine::new(1, 1).unwrap();
        let host = HostAddress::new(Segment::new(AddressSpace::Host, pageable(1 << 20).unwrap()));
        let device =
            DeviceAddress::new(Segment::new(AddressSpace::Device, pageable(1 << 20).unwrap()));
        let guard = device.segment().lock();
        let first = engine.submit(job(SyncType::HostToDevice, &host, &device)).unwrap();
        let err = engine
            .submit(job(SyncType::HostToDevice, &host, &device))
            .unwrap_err();
        assert!(err.is_backend_error());
        drop(guard);
        first.join().unwrap();
    }
}
