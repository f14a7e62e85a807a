//! # I/O Request
//!
//! `IoRequest` describes one transfer: where (file id and offset), how
//! (read or write, sync or async, priority hints), who is notified on
//! completion (owner id and NUMA node) and the payload. The payload kind is
//! chosen at construction:
//!
//! ```text
//!   Basic        one caller-owned buffer
//!   Extended     RequestExtension: buffer list, split tracking, completion counters
//!   UserCompute  an application computation instead of a buffer
//! ```
//!
//! The kind only changes when `init_from` copies another request wholesale.
//! Fields are kept plain here; the packed 48-bit / 16-bit layout exists only
//! on the wire (see `wire`).

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

use super::data_loc::DataLoc;
use super::extension::RequestExtension;
use super::io_buf::{IoBuf, RawBuf};
use super::user_compute::{ComputeRef, UserCompute};
use crate::common::config::{
    ADDR_BITS, ADDR_MASK, FileId, MAX_BUF_SIZE, MAX_NODE_ID, NUM_EMBEDDED_IOVECS, NodeId, PAGE_SIZE,
    round_down, round_page,
};
use crate::common::exception::{ProtocolViolation, fatal};
use crate::storage::page::page_frame::PageFrame;

const MAX_OFFSET: i64 = (1 << (ADDR_BITS - 1)) - 1;
const MIN_OFFSET: i64 = -(1 << (ADDR_BITS - 1));
const MAX_ADDR: u64 = ADDR_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMethod {
    Read = 0,
    Write = 1,
}

impl AccessMethod {
    pub fn from_bit(bit: u32) -> Self {
        if bit & 0x1 == 1 {
            AccessMethod::Write
        } else {
            AccessMethod::Read
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Basic = 0,
    Extended = 1,
    UserCompute = 2,
}

/// Identifies the I/O interface notified when a request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IoOwner(u64);

impl IoOwner {
    pub const NONE: IoOwner = IoOwner(0);

    pub fn new(id: u64) -> Self {
        if id > MAX_ADDR {
            fatal(ProtocolViolation::FieldOverflow { field: "owner", value: id });
        }
        IoOwner(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Non-owning link to another request (split parent, sibling chain).
///
/// The linked request must outlive every request pointing at it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RequestPtr(NonNull<IoRequest>);

// A link is just an address; whoever dereferences it upholds the lifetime contract.
unsafe impl Send for RequestPtr {}
unsafe impl Sync for RequestPtr {}

impl RequestPtr {
    pub fn new(req: &IoRequest) -> Self {
        RequestPtr(NonNull::from(req))
    }

    pub fn as_ptr(&self) -> *const IoRequest {
        self.0.as_ptr()
    }

    /// # Safety
    /// The linked request must still be alive and not mutably borrowed.
    pub unsafe fn as_ref<'a>(&self) -> &'a IoRequest {
        // SAFETY: forwarded to the caller.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for RequestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestPtr({:p})", self.0.as_ptr())
    }
}

pub(crate) enum Payload {
    Basic(RawBuf),
    Extended(Box<RequestExtension>),
    UserCompute(ComputeRef),
}

pub struct IoRequest {
    pub(super) file_id: FileId,
    pub(super) offset: i64,
    pub(super) buf_size: u32,
    pub(super) user_data: u64,
    pub(super) access_method: AccessMethod,
    pub(super) sync: bool,
    pub(super) high_prio: bool,
    pub(super) low_latency: bool,
    pub(super) discarded: bool,
    pub(super) node_id: u8,
    pub(super) owner: IoOwner,
    // Set only on requests decoded from a wire buffer that carries the payload bytes.
    pub(super) data_inline: bool,
    pub(super) payload: Payload,
}

impl IoRequest {
    /// A basic request with no buffer and default flags. With `sync` set it is a flush request.
    pub fn new(sync: bool) -> Self {
        Self {
            file_id: 0,
            offset: 0,
            buf_size: 0,
            user_data: 0,
            access_method: AccessMethod::Read,
            sync,
            high_prio: true,
            low_latency: false,
            discarded: false,
            node_id: 0,
            owner: IoOwner::NONE,
            data_inline: false,
            payload: Payload::Basic(RawBuf::null()),
        }
    }

    /// A control request asking the receiver to flush; carries no data.
    pub fn flush() -> Self {
        Self::new(true)
    }

    pub fn new_basic(
        buf: RawBuf,
        loc: DataLoc,
        size: usize,
        access_method: AccessMethod,
        owner: IoOwner,
        node_id: NodeId,
    ) -> Self {
        let mut req = Self::new(false);
        req.init_basic(buf, loc, size, access_method, owner, node_id);
        req
    }

    /// An extended request. The extension is reset; add buffers afterwards.
    pub fn new_extended(
        ext: Box<RequestExtension>,
        loc: DataLoc,
        access_method: AccessMethod,
        owner: IoOwner,
        node_id: NodeId,
    ) -> Self {
        let mut req = Self::new(false);
        req.payload = Payload::Extended(ext);
        req.init_loc(loc, access_method, owner, node_id);
        req
    }

    pub fn new_user_compute(
        compute: Arc<dyn UserCompute>,
        loc: DataLoc,
        size: usize,
        access_method: AccessMethod,
        owner: IoOwner,
        node_id: NodeId,
    ) -> Self {
        let mut req = Self::new(false);
        req.payload = Payload::UserCompute(ComputeRef::Object(compute));
        req.init_basic(RawBuf::null(), loc, size, access_method, owner, node_id);
        req
    }

    /// Points the request at `buf` and `loc`.
    ///
    /// An extended request has its extension reset and gets `buf` as its only
    /// buffer (none when `buf` is null).
    pub fn init_basic(
        &mut self,
        buf: RawBuf,
        loc: DataLoc,
        size: usize,
        access_method: AccessMethod,
        owner: IoOwner,
        node_id: NodeId,
    ) {
        self.set_data_loc(loc);
        match &mut self.payload {
            Payload::Extended(ext) => {
                ext.init();
                if !buf.is_null() {
                    ext.add_buf(buf, size, false);
                }
                self.buf_size = 0;
            }
            Payload::Basic(addr) => {
                *addr = buf;
                self.set_int_buf_size(size);
            }
            Payload::UserCompute(_) => self.set_int_buf_size(size),
        }
        self.access_method = access_method;
        self.owner = owner;
        self.set_node_id(node_id);
    }

    pub fn init_loc(
        &mut self,
        loc: DataLoc,
        access_method: AccessMethod,
        owner: IoOwner,
        node_id: NodeId,
    ) {
        self.init_basic(RawBuf::null(), loc, 0, access_method, owner, node_id);
    }

    /// Clears the request. Extended requests keep their (reset) extension;
    /// everything else becomes a basic request without a buffer.
    pub fn reset(&mut self) {
        self.data_inline = false;
        match &mut self.payload {
            Payload::Extended(ext) => ext.init(),
            payload => *payload = Payload::Basic(RawBuf::null()),
        }
        self.file_id = 0;
        self.offset = 0;
        self.high_prio = false;
        self.sync = false;
        self.low_latency = false;
        self.discarded = false;
        self.node_id = 0;
        self.owner = IoOwner::NONE;
        self.access_method = AccessMethod::Read;
        self.buf_size = 0;
        self.user_data = 0;
    }

    /// Copies `req` into this request.
    ///
    /// A basic source fits any basic or extended target. An extended source
    /// needs an extended target. Compute requests only copy into compute requests.
    pub fn init_from(&mut self, req: &IoRequest) {
        debug_assert!(!self.data_inline);
        let loc = req.data_loc();
        match (&req.payload, self.payload_kind()) {
            (Payload::UserCompute(compute), PayloadKind::UserCompute) => {
                self.init_basic(RawBuf::null(), loc, req.size(), req.access_method, req.owner, req.node_id());
                self.payload = Payload::UserCompute(compute.clone());
            }
            (Payload::UserCompute(_), _) | (_, PayloadKind::UserCompute) => {
                fatal(ProtocolViolation::IncompatibleCopy)
            }
            (Payload::Basic(buf), _) => {
                self.init_basic(*buf, loc, req.size(), req.access_method, req.owner, req.node_id());
            }
            (Payload::Extended(src), PayloadKind::Extended) => {
                self.init_loc(loc, req.access_method, req.owner, req.node_id());
                self.extension_mut().init_from(src);
            }
            (Payload::Extended(_), PayloadKind::Basic) => fatal(ProtocolViolation::IncompatibleCopy),
        }
        self.copy_flags(req);
        self.user_data = req.user_data;
    }

    fn copy_flags(&mut self, req: &IoRequest) {
        self.sync = req.sync;
        self.high_prio = req.high_prio;
        self.low_latency = req.low_latency;
    }

    fn set_int_buf_size(&mut self, size: usize) {
        if size > MAX_BUF_SIZE {
            fatal(ProtocolViolation::BufferTooLarge(size));
        }
        self.buf_size = size as u32;
    }

    pub fn payload_kind(&self) -> PayloadKind {
        match self.payload {
            Payload::Basic(_) => PayloadKind::Basic,
            Payload::Extended(_) => PayloadKind::Extended,
            Payload::UserCompute(_) => PayloadKind::UserCompute,
        }
    }

    pub fn is_extended_req(&self) -> bool {
        matches!(self.payload, Payload::Extended(_))
    }

    pub fn extension(&self) -> &RequestExtension {
        match &self.payload {
            Payload::Extended(ext) => ext,
            _ => fatal(ProtocolViolation::NotExtended),
        }
    }

    pub fn extension_mut(&mut self) -> &mut RequestExtension {
        match &mut self.payload {
            Payload::Extended(ext) => ext,
            _ => fatal(ProtocolViolation::NotExtended),
        }
    }

    pub fn compute(&self) -> Option<&ComputeRef> {
        match &self.payload {
            Payload::UserCompute(compute) => Some(compute),
            _ => None,
        }
    }

    /// A flush request is a control message, not a data transfer.
    pub fn is_flush(&self) -> bool {
        self.sync && self.high_prio && matches!(self.payload, Payload::Basic(buf) if buf.is_null())
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn data_loc(&self) -> DataLoc {
        DataLoc::new(self.file_id, self.offset)
    }

    pub fn set_data_loc(&mut self, loc: DataLoc) {
        if !(MIN_OFFSET..=MAX_OFFSET).contains(&loc.offset()) {
            fatal(ProtocolViolation::FieldOverflow {
                field: "offset",
                value: loc.offset() as u64,
            });
        }
        self.file_id = loc.file_id();
        self.offset = loc.offset();
    }

    pub fn access_method(&self) -> AccessMethod {
        self.access_method
    }

    pub fn owner(&self) -> IoOwner {
        self.owner
    }

    pub fn set_owner(&mut self, owner: IoOwner) {
        self.owner = owner;
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id as NodeId
    }

    pub fn set_node_id(&mut self, node_id: NodeId) {
        if node_id > MAX_NODE_ID {
            fatal(ProtocolViolation::NodeIdOutOfRange(node_id));
        }
        self.node_id = node_id as u8;
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub fn set_discarded(&mut self, discarded: bool) {
        self.discarded = discarded;
    }

    pub fn is_high_prio(&self) -> bool {
        self.high_prio
    }

    pub fn set_high_prio(&mut self, high_prio: bool) {
        self.high_prio = high_prio;
    }

    pub fn is_low_latency(&self) -> bool {
        self.low_latency
    }

    pub fn set_low_latency(&mut self, low_latency: bool) {
        self.low_latency = low_latency;
    }

    pub fn is_data_inline(&self) -> bool {
        self.data_inline
    }

    /// The requested data sits inside one page on disk.
    pub fn within_1page(&self) -> bool {
        self.offset + self.size() as i64 <= round_page(self.offset) + PAGE_SIZE as i64
    }

    /// The requested data sits inside one RAID block of `raid_block_pages` pages.
    pub fn inside_raid_block(&self, raid_block_pages: usize) -> bool {
        let block = (raid_block_pages * PAGE_SIZE) as i64;
        round_down(self.offset, block) == round_down(self.offset + self.size() as i64 - 1, block)
    }

    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    pub fn set_user_data(&mut self, data: u64) {
        if data > MAX_ADDR {
            fatal(ProtocolViolation::FieldOverflow { field: "user data", value: data });
        }
        self.user_data = data;
    }

    pub fn orig(&self) -> Option<RequestPtr> {
        self.extension().orig()
    }

    pub fn set_orig(&mut self, orig: Option<RequestPtr>) {
        self.extension_mut().set_orig(orig);
    }

    pub fn priv_data(&self) -> usize {
        self.extension().priv_data()
    }

    pub fn set_priv_data(&mut self, priv_data: usize) {
        self.extension_mut().set_priv_data(priv_data);
    }

    pub fn is_empty(&self) -> bool {
        self.extension().num_bufs() == 0
    }

    pub fn is_valid(&self) -> bool {
        self.offset != -1
    }

    pub fn size(&self) -> usize {
        match &self.payload {
            Payload::Extended(ext) => ext.size(),
            _ => self.buf_size as usize,
        }
    }

    /// Address of buffer `idx`. Basic requests only have buffer 0.
    pub fn buf(&self, idx: usize) -> RawBuf {
        match &self.payload {
            Payload::Basic(buf) => {
                debug_assert_eq!(idx, 0);
                *buf
            }
            Payload::Extended(ext) => ext.buf(idx).buf(),
            Payload::UserCompute(_) => RawBuf::null(),
        }
    }

    pub fn page(&self, idx: usize) -> Option<&Arc<PageFrame>> {
        self.extension().buf(idx).as_page()
    }

    pub fn add_buf(&mut self, buf: RawBuf, size: usize) {
        self.extension_mut().add_buf(buf, size, false);
    }

    pub fn add_page(&mut self, page: Arc<PageFrame>) {
        self.extension_mut().add_io_buf(IoBuf::page(page));
    }

    pub fn add_io_buf(&mut self, buf: IoBuf) {
        self.extension_mut().add_io_buf(buf);
    }

    pub fn add_buf_front(&mut self, buf: RawBuf, size: usize) {
        self.extension_mut().add_buf_front(buf, size, false);
    }

    pub fn add_page_front(&mut self, page: Arc<PageFrame>) {
        self.extension_mut().add_io_buf_front(IoBuf::page(page));
    }

    pub fn num_bufs(&self) -> usize {
        match &self.payload {
            Payload::Extended(ext) => ext.num_bufs(),
            _ => 1,
        }
    }

    pub fn buf_size(&self, idx: usize) -> usize {
        match &self.payload {
            Payload::Extended(ext) => ext.buf(idx).size(),
            _ => {
                debug_assert_eq!(idx, 0);
                self.buf_size as usize
            }
        }
    }

    pub fn io_buf(&self, idx: usize) -> &IoBuf {
        self.extension().buf(idx)
    }

    /// (address, length) of every buffer, in transfer order.
    pub fn io_vecs(&self) -> SmallVec<[(RawBuf, usize); NUM_EMBEDDED_IOVECS]> {
        match &self.payload {
            Payload::Extended(ext) => ext.bufs().iter().map(|b| (b.buf(), b.size())).collect(),
            Payload::Basic(buf) => smallvec::smallvec![(*buf, self.buf_size as usize)],
            Payload::UserCompute(_) => SmallVec::new(),
        }
    }

    pub fn next_req(&self) -> Option<RequestPtr> {
        self.extension().next()
    }

    pub fn set_next_req(&mut self, next: Option<RequestPtr>) {
        self.extension_mut().set_next(next);
    }

    pub fn inc_complete_count(&self) -> i32 {
        self.extension().refs().inc()
    }

    pub fn dec_complete_count(&self) -> i32 {
        self.extension().refs().dec()
    }

    pub fn complete_count(&self) -> i32 {
        self.extension().refs().get()
    }

    /// Parks until every outstanding sub-completion released its reference.
    pub fn wait4unref(&self) {
        self.extension().refs().wait();
    }

    /// Busy-waiting variant of `wait4unref` for owners that know the wait is short.
    pub fn wait4unref_spin(&self) {
        self.extension().refs().wait_spin();
    }

    /// Adds `completed` bytes; returns true when the whole request is done.
    pub fn complete_size(&self, completed: usize) -> bool {
        let ext = self.extension();
        let res = ext.inc_completed_size(completed);
        let size = ext.size();
        if res > size {
            fatal(ProtocolViolation::OverCompleted { completed: res, total: size });
        }
        res == size
    }

    pub fn is_complete(&self) -> bool {
        let ext = self.extension();
        ext.completed_size() == ext.size()
    }

    pub fn completed_size(&self) -> usize {
        self.extension().completed_size()
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.extension_mut().set_partial(partial);
    }

    pub fn is_partial(&self) -> bool {
        self.extension().is_partial()
    }

    pub fn set_timestamp(&mut self) {
        self.extension_mut().set_timestamp();
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.extension().timestamp()
    }

    /// Writes into `extracted` the part of this request inside `[off, off + size)`.
    ///
    /// The range must overlap the request and the request must have exactly one buffer.
    pub fn extract(&self, off: i64, size: usize, extracted: &mut IoRequest) {
        if self.num_bufs() != 1 {
            fatal(ProtocolViolation::ExtractMultiBuffer { num_bufs: self.num_bufs() });
        }
        let start = self.offset;
        let end = start + self.size() as i64;
        let range_end = off + size as i64;
        // The start of the range is inside the request, or its end is,
        // or the request is inside the range.
        let overlaps = (off >= start && off < end)
            || (range_end >= start && range_end < end)
            || (off <= start && range_end >= end);
        if !overlaps {
            fatal(ProtocolViolation::ExtractOutOfRange {
                req_off: start,
                req_size: self.size(),
                off,
                size,
            });
        }

        let (req_off, req_buf) = if off <= start {
            (start, self.buf(0))
        } else {
            // The request buffer may not be page aligned.
            (off, self.buf(0).offset_by((off - start) as usize))
        };
        let req_size = (range_end - req_off).min(end - req_off);
        let loc = DataLoc::new(self.file_id, req_off);
        extracted.init_basic(
            req_buf,
            loc,
            req_size as usize,
            self.access_method,
            self.owner,
            self.node_id(),
        );
    }
}

impl Default for IoRequest {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRequest")
            .field("loc", &self.data_loc())
            .field("size", &self.size())
            .field("access", &self.access_method)
            .field("kind", &self.payload_kind())
            .field("node", &self.node_id)
            .field("sync", &self.sync)
            .field("inline", &self.data_inline)
            .finish()
    }
}

/// Groups `reqs` by owning interface and calls `func` once per group, in first-seen order.
pub fn process_reqs_on_io<'a, F>(reqs: &[&'a IoRequest], mut func: F)
where
    F: FnMut(IoOwner, &[&'a IoRequest]),
{
    let mut groups: Vec<(IoOwner, Vec<&'a IoRequest>)> = Vec::new();
    for req in reqs {
        match groups.iter_mut().find(|(owner, _)| *owner == req.owner()) {
            Some((_, group)) => group.push(req),
            None => groups.push((req.owner(), vec![*req])),
        }
    }
    for (owner, group) in &groups {
        func(*owner, group);
    }
}
