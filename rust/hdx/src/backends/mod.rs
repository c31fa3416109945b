//! Driver implementations.
//!
//! - [`none`]: host-only reference backend; every region lives in host memory
//!   and transfers complete inline.
//! - [`xrt`]: emulated accelerator runtime with a separate device address
//!   space, a bounded device heap and asynchronous DMA channels.

use hdx_common::{Result, error::Error};
use hdx_page_alloc::PageBuffer;

pub mod none;
#[cfg(feature = "xrt")]
pub mod xrt;

/// Allocates pageable pages, reporting failure as `AllocationFailure`.
pub(crate) fn pageable(size: usize) -> Result<PageBuffer> {
    PageBuffer::allocate_pageable(size).map_err(|e| Error::allocation_io(size, e))
}
