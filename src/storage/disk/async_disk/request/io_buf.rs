//! Buffer descriptors: one contiguous region taking part in a transfer.

use std::fmt;
use std::ptr;
use std::sync::Arc;

use crate::common::config::{MAX_BUF_SIZE, PAGE_SIZE};
use crate::common::exception::{ProtocolViolation, fatal};
use crate::storage::page::page_frame::PageFrame;

/// Address of caller-owned memory.
///
/// The I/O layer never dereferences it outside a transfer; the caller keeps the
/// memory alive and untouched until the request completes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBuf(*mut u8);

// Only the address crosses threads; the memory contract is the caller's.
unsafe impl Send for RawBuf {}
unsafe impl Sync for RawBuf {}

impl RawBuf {
    pub const fn null() -> Self {
        RawBuf(ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut u8) -> Self {
        RawBuf(ptr)
    }

    pub fn from_slice(buf: &mut [u8]) -> Self {
        RawBuf(buf.as_mut_ptr())
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0
    }

    pub fn addr(&self) -> u64 {
        self.0 as usize as u64
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Address `off` bytes further.
    pub fn offset_by(&self, off: usize) -> Self {
        RawBuf(self.0.wrapping_add(off))
    }
}

impl Default for RawBuf {
    fn default() -> Self {
        RawBuf::null()
    }
}

impl fmt::Debug for RawBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

/// Either a raw region or one managed cache page.
#[derive(Clone)]
pub enum IoBuf {
    Raw { buf: RawBuf, size: u32 },
    Page(Arc<PageFrame>),
}

impl IoBuf {
    pub fn raw(buf: RawBuf, size: usize) -> Self {
        if size > MAX_BUF_SIZE {
            fatal(ProtocolViolation::BufferTooLarge(size));
        }
        IoBuf::Raw {
            buf,
            size: size as u32,
        }
    }

    pub fn page(page: Arc<PageFrame>) -> Self {
        IoBuf::Page(page)
    }

    pub fn is_page(&self) -> bool {
        matches!(self, IoBuf::Page(_))
    }

    /// Start of the region.
    pub fn buf(&self) -> RawBuf {
        match self {
            IoBuf::Raw { buf, .. } => *buf,
            IoBuf::Page(page) => RawBuf::from_ptr(page.as_mut_ptr()),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            IoBuf::Raw { size, .. } => *size as usize,
            IoBuf::Page(_) => PAGE_SIZE,
        }
    }

    pub fn as_page(&self) -> Option<&Arc<PageFrame>> {
        match self {
            IoBuf::Page(page) => Some(page),
            IoBuf::Raw { .. } => None,
        }
    }
}

impl Default for IoBuf {
    fn default() -> Self {
        IoBuf::Raw {
            buf: RawBuf::null(),
            size: 0,
        }
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoBuf::Raw { buf, size } => write!(f, "IoBuf::Raw({buf:?}, {size})"),
            IoBuf::Page(page) => write!(f, "IoBuf::Page({:#x})", page.offset()),
        }
    }
}
