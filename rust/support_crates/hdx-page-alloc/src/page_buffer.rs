//! Owned, page-aligned byte buffers.
//!
//! A [`PageBuffer`] is obtained straight from the platform page mapper rather
//! than the heap, so its start address is always page-aligned and its capacity
//! is a whole number of pages. Pinned buffers are additionally locked into
//! physical memory, which is what a DMA engine needs to address them directly.
//!
//! # Safety
//!
//! `PageBuffer` is `Send` and `Sync`; concurrent writers must be serialized by
//! the owner (the address handles in `hdx` wrap every buffer in a mutex).

use std::sync::OnceLock;

use crate::mmap;

/// Page granularity a buffer was mapped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Regular,
    Large,
}

/// A page-aligned buffer that releases its pages on drop.
pub struct PageBuffer {
    ptr: *mut u8,
    /// Requested length in bytes.
    len: usize,
    /// Mapped capacity, a multiple of `alignment`.
    capacity: usize,
    kind: PageKind,
    /// Page size used for the mapping.
    alignment: usize,
    /// Whether the pages are locked into physical memory.
    locked: bool,
}

impl PageBuffer {
    /// Size of a regular memory page on the current system.
    pub fn regular_page_size() -> usize {
        mmap::get_page_size()
    }

    /// Size of a large (huge) memory page on the current system.
    ///
    /// Availability of large pages depends on system configuration and
    /// privileges; see [`PageBuffer::large_pages_available`].
    pub fn large_page_size() -> usize {
        mmap::get_large_page_size()
    }

    /// Returns `true` if a probe allocation with large pages succeeded. The
    /// probe runs once per process.
    pub fn large_pages_available() -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        *AVAILABLE.get_or_init(|| match mmap::allocate_large_pages(1) {
            Ok((ptr, size)) => {
                let _ = unsafe { mmap::free_large_pages(ptr, size) };
                true
            }
            Err(e) => {
                log::debug!("large pages unavailable: {e}");
                false
            }
        })
    }

    /// Allocates zeroed pageable memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the system cannot map the requested memory.
    pub fn allocate_pageable(size: usize) -> std::io::Result<PageBuffer> {
        let (ptr, capacity) = mmap::allocate(size.max(1))?;
        assert!((ptr as usize).is_multiple_of(Self::regular_page_size()));
        Ok(PageBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            kind: PageKind::Regular,
            alignment: mmap::get_page_size(),
            locked: false,
        })
    }

    /// Allocates zeroed memory and locks it into physical memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the pages cannot be mapped, or if locking them fails
    /// (typically because of `RLIMIT_MEMLOCK`). Nothing stays mapped on error.
    pub fn allocate_pinned(size: usize) -> std::io::Result<PageBuffer> {
        let mut buf = Self::allocate_pageable(size)?;
        unsafe { mmap::lock_pages(buf.ptr as _, buf.capacity)? };
        buf.locked = true;
        Ok(buf)
    }

    /// Allocates pinned memory, degrading to pageable memory when the pages
    /// cannot be locked.
    pub fn allocate_pinned_or_pageable(size: usize) -> std::io::Result<PageBuffer> {
        match Self::allocate_pinned(size) {
            Ok(buf) => Ok(buf),
            Err(e) => {
                log::warn!("cannot pin {size} bytes ({e}), using pageable memory");
                Self::allocate_pageable(size)
            }
        }
    }

    /// Allocates zeroed memory backed by large pages.
    ///
    /// # Errors
    ///
    /// Returns an error if large pages are not configured or exhausted.
    pub fn allocate_large_pages(size: usize) -> std::io::Result<PageBuffer> {
        let (ptr, capacity) = mmap::allocate_large_pages(size.max(1))?;
        assert!((ptr as usize).is_multiple_of(Self::large_page_size()));
        Ok(PageBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            kind: PageKind::Large,
            alignment: mmap::get_large_page_size(),
            locked: false,
        })
    }

    /// Allocates with large pages when the request spans at least one large page
    /// and large pages are available, otherwise with regular pages.
    pub fn allocate_with_fallback(size: usize) -> std::io::Result<PageBuffer> {
        if size >= Self::large_page_size() && Self::large_pages_available() {
            if let Ok(buf) = Self::allocate_large_pages(size) {
                return Ok(buf);
            }
        }
        Self::allocate_pageable(size)
    }

    /// Requested length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped capacity in bytes, always at least `len()` and page-aligned.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw pointer to the start of the mapping.
    ///
    /// The pointer must not be used after the buffer is dropped, and accesses
    /// must stay within `0..len()`.
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Page size the buffer was mapped with.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns `true` if the pages are locked into physical memory.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Reinterprets the contents as a slice of `T`.
    ///
    /// # Panics
    ///
    /// Panics if `len()` is not a multiple of `size_of::<T>()`.
    #[inline]
    pub fn as_slice<T>(&self) -> &[T]
    where
        T: bytemuck::AnyBitPattern,
    {
        bytemuck::cast_slice(self.as_bytes())
    }

    /// Reinterprets the contents as a mutable slice of `T`.
    ///
    /// # Panics
    ///
    /// Panics if `len()` is not a multiple of `size_of::<T>()`.
    #[inline]
    pub fn as_mut_slice<T>(&mut self) -> &mut [T]
    where
        T: bytemuck::AnyBitPattern + bytemuck::NoUninit,
    {
        bytemuck::cast_slice_mut(self.as_bytes_mut())
    }
}

impl std::ops::Deref for PageBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl std::ops::DerefMut for PageBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_bytes_mut()
    }
}

impl AsRef<[u8]> for PageBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsMut<[u8]> for PageBuffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_bytes_mut()
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if self.locked {
            let _ = unsafe { mmap::unlock_pages(self.ptr as _, self.capacity) };
        }
        let _ = match self.kind {
            PageKind::Large => unsafe { mmap::free_large_pages(self.ptr as _, self.capacity) },
            PageKind::Regular => unsafe { mmap::free(self.ptr as _, self.capacity) },
        };
    }
}

// SAFETY: the buffer exclusively owns its mapping and unmaps it on drop.
unsafe impl Send for PageBuffer {}

// SAFETY: shared access only hands out `&[u8]`; mutation requires `&mut self`.
unsafe impl Sync for PageBuffer {}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("kind", &self.kind)
            .field("locked", &self.locked)
            .finish()
    }
}
