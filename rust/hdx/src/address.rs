//! Reference-counted host and device address handles.
//!
//! Both handle types wrap an `Arc<Segment>`: cloning a handle adds a holder, and
//! the segment's pages (plus any device heap reservation) are released when the
//! last holder drops it. A zero-copy region hands out a host and a device handle
//! over the same segment.

use std::{
    any::Any,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use hdx_page_alloc::PageBuffer;

/// Address space a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Host,
    Device,
}

/// Opaque resource kept alive for as long as a segment lives, such as a device
/// heap reservation that is returned to the heap on drop.
pub type ReleaseGuard = Box<dyn Any + Send + Sync>;

/// A block of backing pages in one address space.
pub struct Segment {
    id: u64,
    space: AddressSpace,
    len: usize,
    pages: Mutex<PageBuffer>,
    /// Dropped after `pages`.
    _guard: Option<ReleaseGuard>,
}

impl Segment {
    pub fn new(space: AddressSpace, pages: PageBuffer) -> Segment {
        Segment::with_guard(space, pages, None)
    }

    pub fn with_guard(
        space: AddressSpace,
        pages: PageBuffer,
        guard: Option<ReleaseGuard>,
    ) -> Segment {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Segment {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            space,
            len: pages.len(),
            pages: Mutex::new(pages),
            _guard: guard,
        }
    }

    /// Process-unique segment identifier.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn space(&self) -> AddressSpace {
        self.space
    }

    /// Usable length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Locks the backing pages for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, PageBuffer> {
        self.pages.lock().unwrap()
    }

    /// Whether the backing pages are locked into physical memory.
    pub fn is_pinned(&self) -> bool {
        self.lock().is_locked()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("space", &self.space)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Host-side address handle.
#[derive(Clone, Debug)]
pub struct HostAddress(Arc<Segment>);

/// Device-side address handle.
#[derive(Clone, Debug)]
pub struct DeviceAddress(Arc<Segment>);

impl HostAddress {
    pub fn new(segment: Segment) -> HostAddress {
        HostAddress(Arc::new(segment))
    }

    /// A device handle over the same backing (zero-copy).
    pub fn alias_as_device(&self) -> DeviceAddress {
        DeviceAddress(self.0.clone())
    }

    #[inline]
    pub fn segment(&self) -> &Segment {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of live holders of the backing segment.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether `device` refers to the same physical backing.
    pub fn aliases(&self, device: &DeviceAddress) -> bool {
        Arc::ptr_eq(&self.0, &device.0)
    }
}

impl DeviceAddress {
    pub fn new(segment: Segment) -> DeviceAddress {
        DeviceAddress(Arc::new(segment))
    }

    #[inline]
    pub fn segment(&self) -> &Segment {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of live holders of the backing segment.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountOnDrop(Arc<AtomicUsize>);

    impl Drop for CountOnDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_on_last_holder() {
        let released = Arc::new(AtomicUsize::new(0));
        let pages = PageBuffer::allocate_pageable(128).unwrap();
        let guard: ReleaseGuard = Box::new(CountOnDrop(released.clone()));
        let host = HostAddress::new(Segment::with_guard(
            AddressSpace::Host,
            pages,
            Some(guard),
        ));
        let device = host.alias_as_device();
        let extra = host.clone();
        assert_eq!(host.holders(), 3);
        assert!(host.aliases(&device));

        drop(host);
        drop(device);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(extra);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_segment_ids_are_unique() {
        let a = Segment::new(AddressSpace::Host, PageBuffer::allocate_pageable(1).unwrap());
        let b = Segment::new(AddressSpace::Device, PageBuffer::allocate_pageable(1).unwrap());
        assert_ne!(a.id(), b.id());
        assert_eq!(b.space(), AddressSpace::Device);
        assert_eq!(a.len(), 1);
    }
}
