use crate::{mmap, page_buffer::PageBuffer, PageKind};

#[test]
fn test_regular_allocations() {
    let (ptr, size) = mmap::allocate(1).unwrap();
    assert!(!ptr.is_null());
    assert_eq!(size, mmap::get_page_size());
    assert!((ptr as usize).is_multiple_of(mmap::get_page_size()));
    unsafe { mmap::free(ptr, size).unwrap() };

    let (ptr, size) = mmap::allocate(0).unwrap();
    assert_eq!(size, mmap::get_page_size(), "zero size should map one page");
    unsafe { mmap::free(ptr, size).unwrap() };
}

#[test]
fn test_allocate_rounds_up_to_pages() {
    let page_size = mmap::get_page_size();
    let (ptr, size) = mmap::allocate(page_size * 3 + 100).unwrap();
    assert_eq!(size, page_size * 4);
    unsafe { mmap::free(ptr, size).unwrap() };
}

#[test]
fn test_pageable_buffer() {
    let mut buffer = PageBuffer::allocate_pageable(1000).expect("allocate_pageable");
    assert_eq!(buffer.len(), 1000);
    assert!(!buffer.is_empty());
    assert!(buffer.capacity() >= 1000);
    assert!(buffer.capacity().is_multiple_of(PageBuffer::regular_page_size()));
    assert_eq!(buffer.kind(), PageKind::Regular);
    assert!(!buffer.is_locked());
    assert!((buffer.ptr() as usize).is_multiple_of(buffer.alignment()));
    assert!(buffer.iter().all(|&b| b == 0), "mapped pages start zeroed");

    buffer[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(&buffer.as_bytes()[..4], &[1, 2, 3, 4]);
}

#[test]
fn test_typed_views() {
    let mut buffer = PageBuffer::allocate_pageable(64).unwrap();
    buffer.as_mut_slice::<u32>()[3] = 0xdead_beef;
    assert_eq!(buffer.as_slice::<u32>().len(), 16);
    assert_eq!(buffer.as_slice::<u32>()[3], 0xdead_beef);
    assert_eq!(&buffer[12..16], &0xdead_beef_u32.to_ne_bytes());
}

#[test]
fn test_pinned_buffer() {
    match PageBuffer::allocate_pinned(4096) {
        Ok(buffer) => {
            assert!(buffer.is_locked());
            assert_eq!(buffer.len(), 4096);
        }
        Err(e) => println!("allocate_pinned: {e:?}"),
    }

    let buffer = PageBuffer::allocate_pinned_or_pageable(4096).unwrap();
    assert_eq!(buffer.len(), 4096);
    assert!(buffer.iter().all(|&b| b == 0));
}

#[test]
fn test_large_page_fallback() {
    let small = PageBuffer::allocate_with_fallback(100).unwrap();
    assert_eq!(small.kind(), PageKind::Regular);

    let size = PageBuffer::large_page_size();
    let big = PageBuffer::allocate_with_fallback(size).unwrap();
    assert_eq!(big.len(), size);
    if PageBuffer::large_pages_available() {
        println!("large pages in use: {:?}", big.kind());
    } else {
        assert_eq!(big.kind(), PageKind::Regular);
    }
}
