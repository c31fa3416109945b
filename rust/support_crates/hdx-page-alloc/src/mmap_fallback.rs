//! Portable page emulation on top of the global allocator, used where no
//! native `mmap` shim exists.

use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Allocates `size` bytes rounded up to the (emulated) large page size.
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_large_page_size())
}

/// Frees memory returned by [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pair returned by the allocation.
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_large_page_size()) }
}

/// Allocates `size` bytes rounded up to the (emulated) page size.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_page_size())
}

/// Frees memory returned by [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pair returned by the allocation.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_page_size()) }
}

/// Page locking is not available without a native shim.
///
/// # Safety
///
/// Always safe; present for signature parity with the native shim.
pub unsafe fn lock_pages(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "page locking is not supported on this platform",
    ))
}

/// # Safety
///
/// Always safe; present for signature parity with the native shim.
pub unsafe fn unlock_pages(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Ok(())
}

/// Returns the "large page" size in bytes.
pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

/// Returns the "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}

fn allocate_aligned(
    size: usize,
    page_size: usize,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    let layout = Layout::from_size_align(capacity, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "failed to allocate memory",
        ));
    }
    Ok((ptr as *mut std::ffi::c_void, capacity))
}

unsafe fn free_aligned(
    ptr: *mut std::ffi::c_void,
    size: usize,
    page_size: usize,
) -> std::io::Result<()> {
    assert!(size.is_multiple_of(page_size));
    let layout = Layout::from_size_align(size, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid layout"))?;
    unsafe {
        dealloc(ptr as *mut u8, layout);
    }
    Ok(())
}
