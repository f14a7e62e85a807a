//! # Async I/O Engine
//!
//! `AsyncIoEngine` owns one kernel AIO context for a partition of files. It
//! issues request batches, reaps kernel completions and routes every
//! completed request to the completion pipeline of the request's NUMA node.
//!
//! ## Architecture
//!
//! ```text
//!   Upper layers (page cache, vector storage, ...)
//!   ═══════════════════════════════════════════════════════════════════════
//!          │ access(&[IoRequest]) / access_all(...)
//!          ▼
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          AsyncIoEngine                               │
//!   │                                                                      │
//!   │  CallbackSlabAllocator ──alloc──► CompletionCallbackWrapper          │
//!   │                                     (extended copy of the request)   │
//!   │                                          │ token = in-flight slot    │
//!   │                                          ▼                           │
//!   │  KernelAio (libaio | emulated) ◄── ControlBlock batch                │
//!   │          │                                                           │
//!   │          │ wait4complete() / poll()                                  │
//!   │          ▼                                                           │
//!   │  KernelEvent ──► complete_size ──► route by req.node_id()            │
//!   └──────────────────────────────────────────┬───────────────────────────┘
//!                                              │
//!            ┌─────────────────────────────────┼────────────────────────┐
//!            ▼                                 ▼                        ▼
//!   reaper on the node:              other node:               no thread for node:
//!   CompletionQueue::push            CompletionSender::send    callback inline
//!            │                                 │
//!            ▼                                 ▼
//!   CompletionThread ── IoCallback::invoke ── wrapper back to the slab
//! ```
//!
//! ## Slots
//!
//! The kernel context has `aio_depth_per_file * num_files` slots. A slot is
//! taken from submission until its completion is reaped. `access` never
//! submits more requests than free slots and reports how many it accepted;
//! `access_all` keeps reaping and resubmitting until everything is accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use ::slab::Slab;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};

use super::callback::{CompletionCallbackWrapper, CompletionOwner, IoCallback, IoStatus};
use super::completion::{CompletionSender, CompletionThread};
use super::kernel::{self, ControlBlock, KernelAio};
use super::metrics::{EngineMetrics, EngineStats};
use super::partition::{LogicalFilePartition, OpenFile};
use super::slab::CallbackSlabAllocator;
use crate::common::config::{AioConfig, FileId, INVALID_FILE_ID, NodeId};
use crate::common::exception::AioError;
use crate::common::numa;
use crate::storage::disk::async_disk::request::{AccessMethod, IoOwner, IoRequest, RawBuf};
use crate::storage::disk::direct_io::DirectIoConfig;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

type Wrapper = Box<CompletionCallbackWrapper>;

pub struct AsyncIoEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    owner: IoOwner,
    node_id: NodeId,
    depth: usize,
    config: AioConfig,
    kernel: Box<dyn KernelAio>,
    slab: CallbackSlabAllocator,
    callback: RwLock<Option<Arc<dyn IoCallback>>>,

    files: RwLock<HashMap<FileId, Arc<OpenFile>>>,
    default_file: AtomicI32,

    // Wrappers owned by the kernel, keyed by control block token.
    inflight: Mutex<Slab<Wrapper>>,

    completion_threads: HashMap<NodeId, Arc<CompletionThread>>,
    senders: HashMap<NodeId, CompletionSender>,

    num_iowait: AtomicUsize,
    num_completed: AtomicUsize,
    num_local_alloc: AtomicUsize,
    metrics: EngineMetrics,
    shut_down: AtomicBool,
    weak_self: Weak<EngineShared>,
}

impl AsyncIoEngine {
    /// Opens the files of `partition` and a kernel context sized for them.
    ///
    /// `node_id` is the node the partition's disks are attached to. A sender is
    /// created for every node in `completion_threads`; completions for other
    /// nodes run their callback on the reaping thread.
    pub fn new(
        partition: &LogicalFilePartition,
        completion_threads: &HashMap<NodeId, Arc<CompletionThread>>,
        config: AioConfig,
        node_id: NodeId,
    ) -> Result<Self, AioError> {
        let depth = config.total_depth(partition.num_files());
        let kernel = kernel::open_backend(config.backend, depth)?;
        let direct = DirectIoConfig {
            enabled: config.direct_io,
            ..DirectIoConfig::default()
        };

        let mut files = HashMap::with_capacity(partition.num_files());
        for spec in partition.files() {
            if files.contains_key(&spec.file_id) {
                return Err(AioError::FileAlreadyOpen(spec.file_id));
            }
            files.insert(spec.file_id, Arc::new(OpenFile::open(spec, &direct)?));
        }

        let senders = completion_threads
            .iter()
            .map(|(node, thread)| {
                (*node, CompletionSender::new(Arc::clone(thread.queue()), config.completion_batch))
            })
            .collect();

        let owner = IoOwner::new(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed));
        info!(
            "AIO engine {} on node {}: {} files, depth {}, {} backend, {} completion threads",
            owner.id(),
            node_id,
            partition.num_files(),
            depth,
            kernel.name(),
            completion_threads.len()
        );

        let shared = Arc::new_cyclic(|weak_self| EngineShared {
            owner,
            node_id,
            depth,
            slab: CallbackSlabAllocator::new(node_id, config.slab_increment, config.slab_max_size),
            config,
            kernel,
            callback: RwLock::new(None),
            files: RwLock::new(files),
            default_file: AtomicI32::new(partition.file_id()),
            inflight: Mutex::new(Slab::with_capacity(depth)),
            completion_threads: completion_threads.clone(),
            senders,
            num_iowait: AtomicUsize::new(0),
            num_completed: AtomicUsize::new(0),
            num_local_alloc: AtomicUsize::new(0),
            metrics: EngineMetrics::default(),
            shut_down: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        });
        Ok(Self { shared })
    }

    /// Single synchronous accesses are not offered by an asynchronous engine.
    pub fn access_one(
        &self,
        _buf: RawBuf,
        _offset: i64,
        _size: usize,
        _access_method: AccessMethod,
    ) -> Result<usize, AioError> {
        Err(AioError::UnsupportedOperation)
    }

    /// Submits a prefix of `reqs` and returns its length.
    ///
    /// At most `num_available_io_slots()` requests are taken. A flush request
    /// ends the batch; at the front of `reqs` it flushes the completion
    /// senders and counts as one accepted request.
    pub fn access(&self, reqs: &[IoRequest]) -> Result<usize, AioError> {
        let shared = &self.shared;
        if shared.shut_down.load(Ordering::Acquire) {
            return Err(AioError::Shutdown);
        }
        match reqs.first() {
            None => return Ok(0),
            Some(first) if first.is_flush() => {
                self.flush_requests();
                return Ok(1);
            }
            Some(_) => {}
        }
        let end = reqs.iter().position(IoRequest::is_flush).unwrap_or(reqs.len());

        let mut inflight = shared.inflight.lock();
        let n = (shared.depth - inflight.len()).min(end);
        if n == 0 {
            return Ok(0);
        }
        let batch = &reqs[..n];

        let files = shared.files.read();
        let mut fds = Vec::with_capacity(n);
        for req in batch {
            match files.get(&req.file_id()) {
                Some(file) => fds.push(file.fd()),
                None => return Err(AioError::FileNotFound(req.file_id())),
            }
        }
        drop(files);

        let callback = shared.callback.read().clone();
        let owner: Weak<dyn CompletionOwner> = shared.weak_self.clone();
        let mut cbs = Vec::with_capacity(n);
        for (req, fd) in batch.iter().zip(fds) {
            let mut wrapper = shared.slab.alloc();
            wrapper.req_mut().init_from(req);
            wrapper.req_mut().set_timestamp();
            wrapper.bind(owner.clone(), callback.clone(), fd);
            let iovecs = wrapper.req().io_vecs();
            let token = inflight.insert(wrapper);
            cbs.push(ControlBlock {
                token: token as u64,
                fd,
                opcode: req.access_method(),
                iovecs,
                offset: req.offset(),
            });
        }

        let accepted = match shared.kernel.submit(&cbs) {
            Ok(accepted) => accepted,
            Err(e) if kernel::is_eagain(&e) => 0,
            Err(e) => {
                for cb in &cbs {
                    shared.slab.free(inflight.remove(cb.token as usize));
                }
                return Err(e.into());
            }
        };
        for cb in &cbs[accepted..] {
            shared.slab.free(inflight.remove(cb.token as usize));
        }
        shared.metrics.record_submit(cbs.len(), accepted);
        if accepted < cbs.len() {
            debug!(
                "engine {}: kernel accepted {} of {} requests",
                shared.owner.id(),
                accepted,
                cbs.len()
            );
        } else {
            trace!("engine {}: submitted {} requests", shared.owner.id(), accepted);
        }
        Ok(accepted)
    }

    /// Submits every request in `reqs`, reaping completions to make room.
    ///
    /// When the kernel repeatedly accepts nothing the call backs off
    /// exponentially and, after `submit_retry.max_attempts` fruitless attempts,
    /// reports how far it got.
    pub fn access_all(&self, reqs: &[IoRequest]) -> Result<(), AioError> {
        let policy = &self.shared.config.submit_retry;
        let mut done = 0;
        let mut attempts = 0;
        let mut backoff = policy.initial_backoff;

        while done < reqs.len() {
            if self.num_available_io_slots() == 0 {
                self.wait4complete()?;
            }
            let accepted = self.access(&reqs[done..])?;
            done += accepted;
            if accepted > 0 {
                attempts = 0;
                backoff = policy.initial_backoff;
                continue;
            }

            attempts += 1;
            self.shared.metrics.record_retry();
            if attempts > policy.max_attempts {
                warn!(
                    "engine {}: giving up after {} attempts, {} of {} requests submitted",
                    self.shared.owner.id(),
                    policy.max_attempts,
                    done,
                    reqs.len()
                );
                return Err(AioError::PartialSubmission {
                    accepted: done,
                    requested: reqs.len(),
                });
            }
            thread::sleep(backoff);
            backoff = (backoff * 2).min(policy.max_backoff);
            self.poll()?;
        }
        Ok(())
    }

    /// Blocks until at least one request completes; returns how many were reaped.
    pub fn wait4complete(&self) -> Result<usize, AioError> {
        if self.num_pending_ios() == 0 {
            return Ok(0);
        }
        self.shared.num_iowait.fetch_add(1, Ordering::Relaxed);
        self.shared.reap(1, None)
    }

    /// Reaps whatever already completed without blocking.
    pub fn poll(&self) -> Result<usize, AioError> {
        if self.num_pending_ios() == 0 {
            return Ok(0);
        }
        self.shared.reap(0, Some(Duration::ZERO))
    }

    /// Pushes completions buffered for other nodes to their queues.
    pub fn flush_requests(&self) {
        for sender in self.shared.senders.values() {
            sender.flush(true);
        }
    }

    /// Waits for all requests in flight, flushes the senders and closes every file.
    ///
    /// The kernel context is released when the engine is dropped.
    pub fn cleanup(&self) -> Result<(), AioError> {
        let shared = &self.shared;
        if shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        while self.num_pending_ios() > 0 {
            shared.reap(1, None)?;
        }
        self.flush_requests();

        let files = std::mem::take(&mut *shared.files.write());
        for file in files.values() {
            debug!("closing file {} ({})", file.file_id(), file.path().display());
        }
        shared.default_file.store(INVALID_FILE_ID, Ordering::Release);
        info!("engine {} cleaned up: {}", shared.owner.id(), shared.metrics.stats());
        Ok(())
    }

    /// Opens the files of another partition on this engine.
    pub fn open_file(&self, partition: &LogicalFilePartition) -> Result<(), AioError> {
        let shared = &self.shared;
        if shared.shut_down.load(Ordering::Acquire) {
            return Err(AioError::Shutdown);
        }
        let direct = DirectIoConfig {
            enabled: shared.config.direct_io,
            ..DirectIoConfig::default()
        };
        let mut files = shared.files.write();
        if let Some(spec) = partition.files().iter().find(|s| files.contains_key(&s.file_id)) {
            return Err(AioError::FileAlreadyOpen(spec.file_id));
        }
        for spec in partition.files() {
            files.insert(spec.file_id, Arc::new(OpenFile::open(spec, &direct)?));
        }
        let _ = shared.default_file.compare_exchange(
            INVALID_FILE_ID,
            partition.file_id(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Closes one file once no request against it is in flight.
    pub fn close_file(&self, file_id: FileId) -> Result<(), AioError> {
        let shared = &self.shared;
        // `access` looks the file up and registers its wrappers under the
        // in-flight lock, so holding it makes the check and the removal atomic.
        loop {
            let inflight = shared.inflight.lock();
            let fd = match shared.files.read().get(&file_id) {
                Some(file) => file.fd(),
                None => return Err(AioError::FileNotFound(file_id)),
            };
            if !inflight.iter().any(|(_, w)| w.fd() == fd) {
                shared.files.write().remove(&file_id);
                break;
            }
            drop(inflight);
            shared.reap(1, None)?;
        }
        let _ = shared.default_file.compare_exchange(
            file_id,
            INVALID_FILE_ID,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!("engine {}: closed file {}", shared.owner.id(), file_id);
        Ok(())
    }

    pub fn set_callback(&self, callback: Arc<dyn IoCallback>) -> bool {
        *self.shared.callback.write() = Some(callback);
        true
    }

    pub fn callback(&self) -> Option<Arc<dyn IoCallback>> {
        self.shared.callback.read().clone()
    }

    pub fn support_aio(&self) -> bool {
        true
    }

    /// Id of the first open file, or `INVALID_FILE_ID`.
    pub fn file_id(&self) -> FileId {
        self.shared.default_file.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> IoOwner {
        self.shared.owner
    }

    pub fn node_id(&self) -> NodeId {
        self.shared.node_id
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.depth
    }

    pub fn num_available_io_slots(&self) -> usize {
        self.shared.depth - self.num_pending_ios()
    }

    pub fn num_pending_ios(&self) -> usize {
        self.shared.inflight.lock().len()
    }

    /// Times a caller blocked in `wait4complete`.
    pub fn num_iowait(&self) -> usize {
        self.shared.num_iowait.load(Ordering::Relaxed)
    }

    /// Requests whose callbacks ran and whose wrappers came back.
    pub fn num_completed_reqs(&self) -> usize {
        self.shared.num_completed.load(Ordering::Relaxed)
    }

    /// Completions handled on the reaping thread's own node.
    pub fn num_local_alloc(&self) -> usize {
        self.shared.num_local_alloc.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.metrics.stats()
    }

    pub fn slab(&self) -> &CallbackSlabAllocator {
        &self.shared.slab
    }
}

impl EngineShared {
    /// Reaps kernel events and routes the finished wrappers.
    fn reap(&self, min: usize, timeout: Option<Duration>) -> Result<usize, AioError> {
        let events = self.kernel.reap(min, self.depth, timeout)?;
        let n = events.len();
        for ev in events {
            let Some(mut wrapper) = self.inflight.lock().try_remove(ev.token as usize) else {
                warn!("engine {}: event for unknown token {}", self.owner.id(), ev.token);
                continue;
            };
            let mut status = IoStatus::from_result(ev.result);
            let req = wrapper.req();
            match status {
                IoStatus::Completed { bytes } | IoStatus::Short { bytes, .. } => {
                    if !req.complete_size(bytes) {
                        debug!(
                            "short transfer at {}: {} of {} bytes",
                            req.data_loc(),
                            bytes,
                            req.size()
                        );
                        status = IoStatus::Short { bytes, expected: req.size() };
                        self.metrics.record_short();
                    }
                    let latency = req.timestamp().map(|t| t.elapsed());
                    self.metrics.record_complete(
                        latency,
                        bytes,
                        req.access_method() == AccessMethod::Read,
                    );
                }
                IoStatus::Failed { errno } => {
                    warn!(
                        "I/O at {} failed: {}",
                        req.data_loc(),
                        std::io::Error::from_raw_os_error(errno)
                    );
                    self.metrics.record_failed();
                }
            }
            wrapper.set_status(status);
            self.route(wrapper);
        }
        for sender in self.senders.values() {
            sender.flush(false);
        }
        Ok(n)
    }

    fn route(&self, wrapper: Wrapper) {
        let node = wrapper.req().node_id();
        let Some(thread) = self.completion_threads.get(&node) else {
            self.metrics.record_inline();
            self.num_local_alloc.fetch_add(1, Ordering::Relaxed);
            wrapper.run();
            return;
        };
        if numa::current_node() == Some(node) {
            self.metrics.record_local();
            self.num_local_alloc.fetch_add(1, Ordering::Relaxed);
            if let Err(wrapper) = thread.queue().push(wrapper) {
                wrapper.run();
            }
        } else if let Some(sender) = self.senders.get(&node) {
            self.metrics.record_remote();
            sender.send(wrapper);
        } else {
            wrapper.run();
        }
    }
}

impl CompletionOwner for EngineShared {
    fn complete(&self, wrapper: Wrapper) {
        self.num_completed.fetch_add(1, Ordering::Relaxed);
        self.slab.free(wrapper);
    }
}

impl Drop for AsyncIoEngine {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("engine {} cleanup failed: {}", self.shared.owner.id(), e);
        }
    }
}
