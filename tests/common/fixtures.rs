use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use flash_aio::common::config::{AioBackend, AioConfig, FileId, NodeId, PAGE_SIZE};
use flash_aio::storage::disk::async_disk::io::{
    AsyncIoEngine, CompletionThread, IoStatus, LogicalFilePartition,
};
use flash_aio::storage::disk::async_disk::request::{
    AccessMethod, DataLoc, IoOwner, IoRequest, RawBuf,
};
use flash_aio::storage::disk::direct_io::AlignedBuffer;
use tempfile::TempDir;

use super::logger::init_test_logger;

/// An engine over `num_files` temporary files, backed by the emulated kernel AIO.
pub struct EngineContext {
    pub engine: AsyncIoEngine,
    pub threads: HashMap<NodeId, Arc<CompletionThread>>,
    pub completed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    _dir: TempDir,
}

impl EngineContext {
    pub fn new(num_files: usize, depth_per_file: usize, thread_nodes: &[NodeId]) -> Self {
        init_test_logger();
        let dir = TempDir::new().expect("temp dir");
        let mut partition = LogicalFilePartition::new();
        for i in 0..num_files {
            partition.add_file(i as FileId, dir.path().join(format!("part-{i}.dat")));
        }

        let threads: HashMap<_, _> = thread_nodes
            .iter()
            .map(|&node| (node, CompletionThread::spawn(node).expect("completion thread")))
            .collect();

        let config = AioConfig::default()
            .with_depth(depth_per_file)
            .with_backend(AioBackend::Emulated { workers: 4 });
        let engine = AsyncIoEngine::new(&partition, &threads, config, 0).expect("engine");

        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (ok, err) = (Arc::clone(&completed), Arc::clone(&failed));
        engine.set_callback(Arc::new(move |_: &IoRequest, status: IoStatus| {
            if status.is_ok() {
                ok.fetch_add(1, Ordering::SeqCst);
            } else {
                err.fetch_add(1, Ordering::SeqCst);
            }
        }));

        Self {
            engine,
            threads,
            completed,
            failed,
            _dir: dir,
        }
    }

    /// Reaps until nothing is in flight, then pushes buffered remote completions.
    pub fn drain(&self) {
        while self.engine.num_pending_ios() > 0 {
            self.engine.wait4complete().expect("wait4complete");
        }
        self.engine.flush_requests();
    }

    /// Waits until `n` wrappers have come back to the engine.
    pub fn wait_completed(&self, n: usize) {
        wait_until(|| self.engine.num_completed_reqs() >= n);
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        let _ = self.engine.cleanup();
        for thread in self.threads.values() {
            thread.shutdown();
        }
    }
}

/// Polls `cond` for up to ten seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A page-aligned buffer filled with `byte`.
pub fn filled_page(byte: u8) -> AlignedBuffer {
    let mut buf = AlignedBuffer::page_aligned(PAGE_SIZE);
    buf.as_mut_slice().fill(byte);
    buf
}

pub fn page_req(
    buf: &AlignedBuffer,
    file_id: FileId,
    page: usize,
    method: AccessMethod,
    node: NodeId,
) -> IoRequest {
    IoRequest::new_basic(
        RawBuf::from_ptr(buf.as_mut_ptr()),
        DataLoc::new(file_id, (page * PAGE_SIZE) as i64),
        buf.len(),
        method,
        IoOwner::NONE,
        node,
    )
}
