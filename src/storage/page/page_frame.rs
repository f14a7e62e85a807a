//! Cache page as seen by the I/O layer.
//!
//! The page cache owns replacement, pinning and dirty tracking. The I/O layer
//! only needs a page-aligned, page-sized frame whose memory stays put while a
//! request referencing it is in flight, and the file location it caches.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::common::config::{INVALID_OFFSET, PAGE_SIZE};
use crate::storage::disk::direct_io::AlignedBuffer;

pub struct PageFrame {
    data: AlignedBuffer,
    offset: AtomicI64,
    io_pending: AtomicBool,
}

impl PageFrame {
    pub fn new() -> Self {
        Self {
            data: AlignedBuffer::page_aligned(PAGE_SIZE),
            offset: AtomicI64::new(INVALID_OFFSET),
            io_pending: AtomicBool::new(false),
        }
    }

    /// A frame caching the page at `offset`.
    pub fn with_offset(offset: i64) -> Self {
        let frame = Self::new();
        frame.set_offset(offset);
        frame
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn set_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::Release);
    }

    pub fn set_io_pending(&self, pending: bool) {
        self.io_pending.store(pending, Ordering::Release);
    }

    pub fn is_io_pending(&self) -> bool {
        self.io_pending.load(Ordering::Acquire)
    }

    /// Address handed to the kernel.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Page contents. Callers must not read while a read into the frame is in flight.
    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Copies `src` into the frame at `at`.
    ///
    /// # Safety
    /// No I/O may be in flight on this frame and no other thread may access it.
    pub unsafe fn write_at(&self, at: usize, src: &[u8]) {
        assert!(at + src.len() <= PAGE_SIZE, "write past the end of the page");
        // SAFETY: bounds checked above; exclusivity is the caller's contract.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.as_mut_ptr().add(at), src.len());
        }
    }
}

impl Default for PageFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFrame")
            .field("offset", &self.offset())
            .field("io_pending", &self.is_io_pending())
            .field("addr", &self.data.as_ptr())
            .finish()
    }
}
