//! Portable AIO backend.
//!
//! A fixed set of worker threads performs `pread`/`pwrite` for submitted
//! control blocks and posts one event per block. A slot stays taken until its
//! event is reaped, matching the native context.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use log::{debug, trace};
use parking_lot::Mutex;

use super::{ControlBlock, KernelAio, KernelEvent};
use crate::storage::disk::async_disk::request::AccessMethod;

pub struct EmulatedAio {
    depth: usize,
    inflight: AtomicUsize,
    jobs: Mutex<Option<Sender<ControlBlock>>>,
    events: Receiver<KernelEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EmulatedAio {
    pub fn new(depth: usize, workers: usize) -> io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<ControlBlock>();
        let (event_tx, event_rx) = unbounded::<KernelEvent>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let jobs = job_rx.clone();
            let events = event_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("aio-emu-{i}"))
                .spawn(move || {
                    for cb in jobs.iter() {
                        let result = execute(&cb);
                        if events.send(KernelEvent { token: cb.token, result }).is_err() {
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }
        debug!("emulated AIO started: depth {}, {} workers", depth, handles.len());

        Ok(Self {
            depth,
            inflight: AtomicUsize::new(0),
            jobs: Mutex::new(Some(job_tx)),
            events: event_rx,
            workers: Mutex::new(handles),
        })
    }

    fn release(&self, n: usize) {
        self.inflight.fetch_sub(n, Ordering::AcqRel);
    }
}

/// Hands blocks to the workers in order; stops at the first one no worker can take.
fn queue(jobs: &Sender<ControlBlock>, cbs: &[ControlBlock]) -> usize {
    cbs.iter().take_while(|cb| jobs.send((*cb).clone()).is_ok()).count()
}

/// Runs one control block; bytes transferred or a negated errno.
fn execute(cb: &ControlBlock) -> i64 {
    let mut done = 0usize;
    for (buf, len) in &cb.iovecs {
        let mut seg = 0usize;
        while seg < *len {
            let off = cb.offset + (done + seg) as i64;
            // SAFETY: the issuer keeps every buffer alive and exclusive until the event is reaped.
            let ret = unsafe {
                let ptr = buf.as_ptr().add(seg);
                match cb.opcode {
                    AccessMethod::Read => libc::pread(cb.fd, ptr.cast(), len - seg, off as libc::off_t),
                    AccessMethod::Write => libc::pwrite(cb.fd, ptr.cast(), len - seg, off as libc::off_t),
                }
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return -(err.raw_os_error().unwrap_or(libc::EIO) as i64);
            }
            if ret == 0 {
                // End of file: report the short transfer.
                return (done + seg) as i64;
            }
            seg += ret as usize;
        }
        done += seg;
    }
    done as i64
}

impl KernelAio for EmulatedAio {
    fn queue_depth(&self) -> usize {
        self.depth
    }

    fn submit(&self, cbs: &[ControlBlock]) -> io::Result<usize> {
        if cbs.is_empty() {
            return Ok(0);
        }
        let jobs = self.jobs.lock();
        let Some(jobs) = jobs.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "emulated AIO shut down"));
        };

        let inflight = self.inflight.load(Ordering::Acquire);
        let n = self.depth.saturating_sub(inflight).min(cbs.len());
        if n == 0 {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        self.inflight.fetch_add(n, Ordering::AcqRel);
        let queued = queue(jobs, &cbs[..n]);
        if queued < n {
            self.release(n - queued);
            debug!("emulated AIO workers exited after {} of {} blocks", queued, n);
            if queued == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "emulated AIO workers exited"));
            }
        }
        trace!("emulated submit accepted {} of {}", queued, cbs.len());
        Ok(queued)
    }

    fn reap(&self, min: usize, max: usize, timeout: Option<Duration>) -> io::Result<Vec<KernelEvent>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut out = Vec::new();

        while out.len() < max {
            if out.len() < min {
                let ev = match deadline {
                    None => self.events.recv().ok(),
                    Some(deadline) => match self.events.recv_deadline(deadline) {
                        Ok(ev) => Some(ev),
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => None,
                    },
                };
                match ev {
                    Some(ev) => out.push(ev),
                    None => break,
                }
            } else {
                match self.events.try_recv() {
                    Ok(ev) => out.push(ev),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        self.release(out.len());
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "emulated"
    }
}

impl Drop for EmulatedAio {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loops.
        self.jobs.lock().take();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
