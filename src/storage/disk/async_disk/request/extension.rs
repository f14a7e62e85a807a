//! Out-of-line state of an extended request.
//!
//! Buffer descriptors live inline up to `NUM_EMBEDDED_IOVECS`; the first push
//! beyond that moves them to one heap array owned by the extension, and the
//! inline storage is not used again until the extension is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::trace;
use smallvec::SmallVec;

use super::io_buf::{IoBuf, RawBuf};
use super::io_request::RequestPtr;
use super::ref_count::RefCount;
use crate::common::config::{NUM_EMBEDDED_IOVECS, PAGE_SIZE};
use crate::common::exception::{ProtocolViolation, fatal};

pub type IoBufVec = SmallVec<[IoBuf; NUM_EMBEDDED_IOVECS]>;

#[derive(Debug, Default)]
pub struct RequestExtension {
    orig: Option<RequestPtr>,
    priv_data: usize,
    user_data: usize,
    // Is the request part of a larger request?
    partial: bool,
    bufs: IoBufVec,
    refs: RefCount,
    completed_size: AtomicUsize,
    next: Option<RequestPtr>,
    issue_time: Option<Instant>,
}

impl RequestExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the extension to a clean state for reuse. Spilled buffer storage is kept.
    pub fn init(&mut self) {
        self.orig = None;
        self.priv_data = 0;
        self.user_data = 0;
        self.partial = false;
        self.bufs.clear();
        self.next = None;
        self.issue_time = None;
        self.refs.reset();
        self.completed_size.store(0, Ordering::Release);
    }

    /// Copies the request-describing state of `other`. Completion state must be clean.
    pub fn init_from(&mut self, other: &RequestExtension) {
        debug_assert_eq!(self.refs.get(), 0);
        debug_assert_eq!(self.completed_size(), 0);
        debug_assert!(self.next.is_none());
        self.orig = other.orig;
        self.priv_data = other.priv_data;
        self.user_data = other.user_data;
        self.partial = other.partial;
        self.bufs.clear();
        self.bufs.extend(other.bufs.iter().cloned());
        self.issue_time = None;
    }

    pub fn orig(&self) -> Option<RequestPtr> {
        self.orig
    }

    pub fn set_orig(&mut self, orig: Option<RequestPtr>) {
        self.orig = orig;
    }

    pub fn priv_data(&self) -> usize {
        self.priv_data
    }

    pub fn set_priv_data(&mut self, priv_data: usize) {
        self.priv_data = priv_data;
    }

    pub fn user_data(&self) -> usize {
        self.user_data
    }

    pub fn set_user_data(&mut self, user_data: usize) {
        self.user_data = user_data;
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.partial = partial;
    }

    pub fn next(&self) -> Option<RequestPtr> {
        self.next
    }

    pub fn set_next(&mut self, next: Option<RequestPtr>) {
        self.next = next;
    }

    pub fn refs(&self) -> &RefCount {
        &self.refs
    }

    /// Adds `size` completed bytes and returns the new total.
    pub fn inc_completed_size(&self, size: usize) -> usize {
        self.completed_size.fetch_add(size, Ordering::AcqRel) + size
    }

    pub fn completed_size(&self) -> usize {
        self.completed_size.load(Ordering::Acquire)
    }

    pub fn set_timestamp(&mut self) {
        self.issue_time = Some(Instant::now());
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.issue_time
    }

    pub fn add_io_buf(&mut self, buf: IoBuf) {
        self.note_growth();
        self.bufs.push(buf);
    }

    pub fn add_buf(&mut self, buf: RawBuf, size: usize, is_page: bool) {
        if is_page && size != PAGE_SIZE {
            fatal(ProtocolViolation::PagedBufferSize(size));
        }
        self.add_io_buf(IoBuf::raw(buf, size));
    }

    pub fn add_io_buf_front(&mut self, buf: IoBuf) {
        self.note_growth();
        self.bufs.insert(0, buf);
    }

    pub fn add_buf_front(&mut self, buf: RawBuf, size: usize, is_page: bool) {
        if is_page && size != PAGE_SIZE {
            fatal(ProtocolViolation::PagedBufferSize(size));
        }
        self.add_io_buf_front(IoBuf::raw(buf, size));
    }

    fn note_growth(&self) {
        if self.bufs.len() == self.bufs.capacity() {
            trace!(
                "io buf vector full at {} entries{}",
                self.bufs.len(),
                if self.bufs.spilled() { "" } else { ", spilling to the heap" }
            );
        }
    }

    pub fn num_bufs(&self) -> usize {
        self.bufs.len()
    }

    pub fn buf(&self, idx: usize) -> &IoBuf {
        &self.bufs[idx]
    }

    pub fn bufs(&self) -> &[IoBuf] {
        &self.bufs
    }

    /// True once the descriptors moved to heap storage.
    pub fn is_spilled(&self) -> bool {
        self.bufs.spilled()
    }

    pub fn size(&self) -> usize {
        self.bufs.iter().map(IoBuf::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_buf(i: usize) -> RawBuf {
        RawBuf::from_ptr((0x1000 * (i + 1)) as *mut u8)
    }

    #[test]
    fn test_spill_preserves_order() {
        let mut ext = RequestExtension::new();
        for i in 0..NUM_EMBEDDED_IOVECS {
            ext.add_buf(fake_buf(i), 512, false);
        }
        assert!(!ext.is_spilled());

        ext.add_buf(fake_buf(NUM_EMBEDDED_IOVECS), 512, false);
        assert!(ext.is_spilled());
        assert_eq!(ext.num_bufs(), NUM_EMBEDDED_IOVECS + 1);
        for i in 0..=NUM_EMBEDDED_IOVECS {
            assert_eq!(ext.buf(i).buf(), fake_buf(i));
        }
        assert_eq!(ext.size(), 512 * (NUM_EMBEDDED_IOVECS + 1));
    }

    #[test]
    fn test_add_front() {
        let mut ext = RequestExtension::new();
        ext.add_buf(fake_buf(1), 100, false);
        ext.add_buf_front(fake_buf(0), 50, false);
        assert_eq!(ext.buf(0).buf(), fake_buf(0));
        assert_eq!(ext.buf(1).buf(), fake_buf(1));
        assert_eq!(ext.size(), 150);
    }

    #[test]
    fn test_init_clears_state() {
        let mut ext = RequestExtension::new();
        ext.add_buf(fake_buf(0), 4096, true);
        ext.set_priv_data(7);
        ext.set_partial(true);
        ext.inc_completed_size(4096);
        ext.refs().inc();
        ext.set_timestamp();

        ext.init();
        assert_eq!(ext.num_bufs(), 0);
        assert_eq!(ext.priv_data(), 0);
        assert!(!ext.is_partial());
        assert_eq!(ext.completed_size(), 0);
        assert_eq!(ext.refs().get(), 0);
        assert!(ext.timestamp().is_none());
    }

    #[test]
    fn test_init_from_copies_buffers() {
        let mut src = RequestExtension::new();
        for i in 0..NUM_EMBEDDED_IOVECS + 2 {
            src.add_buf(fake_buf(i), 8, false);
        }
        src.set_user_data(42);

        let mut dst = RequestExtension::new();
        dst.init_from(&src);
        assert_eq!(dst.num_bufs(), src.num_bufs());
        assert_eq!(dst.user_data(), 42);
        assert_eq!(dst.size(), src.size());
    }

    #[test]
    #[should_panic(expected = "exactly one page")]
    fn test_page_must_be_page_sized() {
        RequestExtension::new().add_buf(fake_buf(0), 100, true);
    }
}
