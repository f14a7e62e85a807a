//! Per-node thread running completion callbacks.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::queue::CompletionQueue;
use crate::common::config::{AIO_DEPTH_PER_FILE, NodeId};
use crate::common::numa;

pub struct CompletionThread {
    node_id: NodeId,
    queue: Arc<CompletionQueue>,
    num_completed: Arc<AtomicUsize>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionThread {
    /// Starts the completion thread of `node_id` with an unbounded queue.
    pub fn spawn(node_id: NodeId) -> io::Result<Arc<Self>> {
        Self::spawn_with_queue(Arc::new(CompletionQueue::new(node_id)), AIO_DEPTH_PER_FILE)
    }

    /// Starts a thread draining `queue` in batches of at most `batch` wrappers.
    pub fn spawn_with_queue(queue: Arc<CompletionQueue>, batch: usize) -> io::Result<Arc<Self>> {
        let node_id = queue.node_id();
        let num_completed = Arc::new(AtomicUsize::new(0));

        let handle = {
            let queue = Arc::clone(&queue);
            let num_completed = Arc::clone(&num_completed);
            thread::Builder::new()
                .name(format!("aio-complete-{node_id}"))
                .spawn(move || {
                    numa::bind_current_thread(node_id);
                    debug!("completion thread for node {} started", node_id);
                    loop {
                        let n = queue.process(batch.max(1), true);
                        num_completed.fetch_add(n, Ordering::Relaxed);
                        if n == 0 && queue.is_closed() {
                            break;
                        }
                    }
                    debug!("completion thread for node {} exiting", node_id);
                })?
        };

        Ok(Arc::new(Self {
            node_id,
            queue,
            num_completed,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }

    /// Requests whose callbacks this thread ran.
    pub fn num_completed_reqs(&self) -> usize {
        self.num_completed.load(Ordering::Relaxed)
    }

    /// Closes the queue, lets the thread drain it and joins it.
    pub fn shutdown(&self) {
        self.queue.close();
        if let Some(handle) = self.handle.lock().take() {
            // The last owner can be dropped by a callback on this very thread.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("completion thread for node {} panicked", self.node_id);
            }
            info!(
                "completion thread for node {} stopped after {} requests",
                self.node_id,
                self.num_completed_reqs()
            );
        }
    }
}

impl Drop for CompletionThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
