//! Linux native AIO context.
//!
//! Single-buffer operations use `IOCB_CMD_PREAD`/`IOCB_CMD_PWRITE`; scattered
//! ones use the vectored commands. The kernel copies the iovec array during
//! `io_submit`, so it only has to live for the duration of the call.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{ControlBlock, KernelAio, KernelEvent};
use crate::common::config::NUM_EMBEDDED_IOVECS;
use crate::storage::disk::async_disk::request::AccessMethod;

type AioContext = libc::c_ulong;

const IOCB_CMD_PREAD: u16 = 0;
const IOCB_CMD_PWRITE: u16 = 1;
const IOCB_CMD_PREADV: u16 = 7;
const IOCB_CMD_PWRITEV: u16 = 8;

/// `struct iocb` (little-endian layout).
#[repr(C)]
#[derive(Clone, Copy)]
struct Iocb {
    data: u64,
    key: u32,
    rw_flags: u32,
    lio_opcode: u16,
    reqprio: i16,
    fildes: u32,
    buf: u64,
    nbytes: u64,
    offset: i64,
    reserved2: u64,
    flags: u32,
    resfd: u32,
}

/// `struct io_event`.
#[repr(C)]
#[derive(Clone, Copy)]
struct IoEvent {
    data: u64,
    obj: u64,
    res: i64,
    res2: i64,
}

pub struct LibaioContext {
    ctx: AioContext,
    depth: usize,
    // io_getevents writes into this; one reaper at a time.
    events: Mutex<Vec<IoEvent>>,
}

impl LibaioContext {
    pub fn new(depth: usize) -> io::Result<Self> {
        let mut ctx: AioContext = 0;
        // SAFETY: ctx is a valid out pointer and must be zero on entry.
        let ret = unsafe { libc::syscall(libc::SYS_io_setup, depth as libc::c_long, &mut ctx as *mut AioContext) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: io_event is plain data; all-zero is a valid value.
        let events = vec![unsafe { MaybeUninit::<IoEvent>::zeroed().assume_init() }; depth];
        Ok(Self {
            ctx,
            depth,
            events: Mutex::new(events),
        })
    }

    fn build_iocb(cb: &ControlBlock, iovecs: &[libc::iovec]) -> Iocb {
        let (opcode, buf, nbytes) = match (cb.opcode, cb.iovecs.as_slice()) {
            (AccessMethod::Read, [(buf, len)]) => (IOCB_CMD_PREAD, buf.addr(), *len as u64),
            (AccessMethod::Write, [(buf, len)]) => (IOCB_CMD_PWRITE, buf.addr(), *len as u64),
            (AccessMethod::Read, _) => (IOCB_CMD_PREADV, iovecs.as_ptr() as u64, iovecs.len() as u64),
            (AccessMethod::Write, _) => (IOCB_CMD_PWRITEV, iovecs.as_ptr() as u64, iovecs.len() as u64),
        };
        Iocb {
            data: cb.token,
            key: 0,
            rw_flags: 0,
            lio_opcode: opcode,
            reqprio: 0,
            fildes: cb.fd as u32,
            buf,
            nbytes,
            offset: cb.offset,
            reserved2: 0,
            flags: 0,
            resfd: 0,
        }
    }
}

impl KernelAio for LibaioContext {
    fn queue_depth(&self) -> usize {
        self.depth
    }

    fn submit(&self, cbs: &[ControlBlock]) -> io::Result<usize> {
        if cbs.is_empty() {
            return Ok(0);
        }
        let iovecs: Vec<SmallVec<[libc::iovec; NUM_EMBEDDED_IOVECS]>> = cbs
            .iter()
            .map(|cb| {
                cb.iovecs
                    .iter()
                    .map(|(buf, len)| libc::iovec {
                        iov_base: buf.as_ptr().cast(),
                        iov_len: *len,
                    })
                    .collect()
            })
            .collect();
        let mut iocbs: Vec<Iocb> = cbs
            .iter()
            .zip(&iovecs)
            .map(|(cb, vecs)| Self::build_iocb(cb, vecs))
            .collect();
        let mut ptrs: Vec<*mut Iocb> = iocbs.iter_mut().map(|cb| cb as *mut Iocb).collect();

        // SAFETY: every pointer refers to a live iocb; iovec arrays outlive the call.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_submit,
                self.ctx,
                ptrs.len() as libc::c_long,
                ptrs.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        trace!("io_submit accepted {} of {}", ret, cbs.len());
        Ok(ret as usize)
    }

    fn reap(&self, min: usize, max: usize, timeout: Option<Duration>) -> io::Result<Vec<KernelEvent>> {
        let mut events = self.events.lock();
        let max = max.min(events.len());
        let mut ts = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_mut()
            .map_or(ptr::null_mut(), |ts| ts as *mut libc::timespec);

        // SAFETY: events holds at least `max` entries.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                self.ctx,
                min.min(max) as libc::c_long,
                max as libc::c_long,
                events.as_mut_ptr(),
                ts_ptr,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        Ok(events[..ret as usize]
            .iter()
            .map(|ev| KernelEvent {
                token: ev.data,
                result: ev.res,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "libaio"
    }
}

impl Drop for LibaioContext {
    fn drop(&mut self) {
        // SAFETY: ctx came from io_setup and is destroyed once.
        let ret = unsafe { libc::syscall(libc::SYS_io_destroy, self.ctx) };
        if ret < 0 {
            warn!("io_destroy failed: {}", io::Error::last_os_error());
        }
    }
}
