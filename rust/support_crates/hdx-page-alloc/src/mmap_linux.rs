use std::sync::OnceLock;

/// Maps `size` bytes (rounded up to the large page size) of anonymous memory
/// backed by huge pages.
///
/// Returns the mapped pointer and the rounded capacity. The capacity must be
/// passed back to [`free_large_pages`] unchanged.
///
/// Succeeds only when the kernel has huge pages available, either reserved
/// through `/proc/sys/vm/nr_hugepages` or overcommitted through
/// `/proc/sys/vm/nr_overcommit_hugepages`.
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    map_anonymous(size, get_large_page_size(), libc::MAP_HUGETLB)
}

/// Unmaps a region returned by [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pair returned by the allocation, and the
/// region must not be referenced after this call.
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free(ptr, size) }
}

/// Maps `size` bytes (rounded up to the regular page size) of zeroed,
/// readable and writable anonymous memory.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    map_anonymous(size, get_page_size(), 0)
}

/// Unmaps a region returned by [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pair returned by the allocation, and the
/// region must not be referenced after this call.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Locks the pages of a mapped region into physical memory so that a DMA
/// engine can address them without the kernel paging them out.
///
/// Fails with `EPERM`/`ENOMEM` when the process exceeds `RLIMIT_MEMLOCK`
/// and lacks `CAP_IPC_LOCK`.
///
/// # Safety
///
/// `ptr..ptr + size` must lie inside a live mapping owned by the caller.
pub unsafe fn lock_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::mlock(ptr as *const _, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Reverts [`lock_pages`].
///
/// # Safety
///
/// `ptr..ptr + size` must lie inside a live mapping owned by the caller.
pub unsafe fn unlock_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munlock(ptr as *const _, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Huge page size reported by `/proc/meminfo`, 2MB when it cannot be read.
pub fn get_large_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_large_page_size().unwrap_or(2 * 1024 * 1024))
}

/// Regular page size from `sysconf(_SC_PAGESIZE)`, 4KB when it cannot be read.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_page_size().unwrap_or(4 * 1024))
}

fn map_anonymous(
    size: usize,
    page_size: usize,
    extra_flags: libc::c_int,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | extra_flags,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Parses the `Hugepagesize:    2048 kB` line of `/proc/meminfo`.
fn read_large_page_size() -> std::io::Result<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    meminfo
        .lines()
        .find(|line| line.starts_with("Hugepagesize:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<usize>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| std::io::Error::other("failed to read Hugepagesize"))
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
