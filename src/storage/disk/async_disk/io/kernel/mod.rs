//! # Kernel Asynchronous I/O
//!
//! The engine talks to the kernel through [`KernelAio`]: submit a batch of
//! control blocks, then reap completion events. Each control block carries a
//! token that comes back unchanged in its event.
//!
//! - **`libaio`**: Linux native AIO through raw `io_setup`/`io_submit`/`io_getevents` syscalls.
//! - **`emulated`**: worker threads running `pread`/`pwrite`, with the same slot semantics.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use smallvec::SmallVec;

use crate::common::config::{AioBackend, NUM_EMBEDDED_IOVECS};
use crate::storage::disk::async_disk::request::{AccessMethod, RawBuf};

pub mod emulated;
#[cfg(target_os = "linux")]
pub mod libaio;

pub use emulated::EmulatedAio;
#[cfg(target_os = "linux")]
pub use libaio::LibaioContext;

pub type IoVecs = SmallVec<[(RawBuf, usize); NUM_EMBEDDED_IOVECS]>;

/// One operation handed to the kernel.
#[derive(Debug, Clone)]
pub struct ControlBlock {
    pub token: u64,
    pub fd: RawFd,
    pub opcode: AccessMethod,
    pub iovecs: IoVecs,
    pub offset: i64,
}

impl ControlBlock {
    pub fn len(&self) -> usize {
        self.iovecs.iter().map(|(_, len)| len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Completion of one control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEvent {
    pub token: u64,
    /// Bytes transferred, or a negated errno.
    pub result: i64,
}

pub trait KernelAio: Send + Sync {
    /// Maximum number of operations in flight.
    fn queue_depth(&self) -> usize;

    /// Submits a prefix of `cbs` and returns how many were accepted.
    ///
    /// `EAGAIN` means the kernel had no room for even one operation. Any error
    /// means nothing from `cbs` was queued; once a block is queued the call
    /// returns `Ok` with the count so the caller keeps tracking it.
    fn submit(&self, cbs: &[ControlBlock]) -> io::Result<usize>;

    /// Waits until at least `min` events are ready (or `timeout` passes) and
    /// returns up to `max` of them.
    fn reap(&self, min: usize, max: usize, timeout: Option<Duration>) -> io::Result<Vec<KernelEvent>>;

    fn name(&self) -> &'static str;
}

/// Opens the backend selected in the configuration.
pub fn open_backend(backend: AioBackend, depth: usize) -> io::Result<Box<dyn KernelAio>> {
    match backend {
        #[cfg(target_os = "linux")]
        AioBackend::Libaio => Ok(Box::new(LibaioContext::new(depth)?)),
        #[cfg(not(target_os = "linux"))]
        AioBackend::Libaio => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "native AIO is only available on Linux",
        )),
        AioBackend::Emulated { workers } => Ok(Box::new(EmulatedAio::new(depth, workers)?)),
    }
}

pub(crate) fn is_eagain(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAGAIN) || err.kind() == io::ErrorKind::WouldBlock
}
