//! Page-granular backing storage for host and device regions.
//!
//! [`page_buffer::PageBuffer`] is the unit of ownership behind every address
//! handle: pageable pages for cacheable host regions, page-locked (pinned)
//! pages for DMA-capable host regions, and optionally large pages for big
//! device-side allocations.

pub mod page_buffer;

#[cfg_attr(target_os = "linux", path = "mmap_linux.rs")]
#[cfg_attr(not(target_os = "linux"), path = "mmap_fallback.rs")]
pub mod mmap;

pub use page_buffer::{PageBuffer, PageKind};

#[cfg(test)]
mod tests;
