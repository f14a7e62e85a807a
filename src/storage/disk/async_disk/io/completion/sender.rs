//! Buffered producer side of a remote node's completion queue.

use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

use super::queue::CompletionQueue;
use crate::common::config::NodeId;
use crate::storage::disk::async_disk::io::callback::CompletionCallbackWrapper;

type Wrapper = Box<CompletionCallbackWrapper>;

/// Batches wrappers bound for one node so the remote queue lock is taken once per batch.
///
/// A sent wrapper belongs to the queue; the producer never touches it again.
#[derive(Debug)]
pub struct CompletionSender {
    node_id: NodeId,
    queue: Arc<CompletionQueue>,
    buf: Mutex<Vec<Wrapper>>,
    capacity: usize,
}

impl CompletionSender {
    pub fn new(queue: Arc<CompletionQueue>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            node_id: queue.node_id(),
            queue,
            buf: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Buffers `wrapper`; a full buffer is flushed before returning.
    pub fn send(&self, wrapper: Wrapper) {
        let mut buf = self.buf.lock();
        buf.push(wrapper);
        if buf.len() >= self.capacity {
            let orphans = self.flush_locked(&mut buf, true).1;
            drop(buf);
            self.run_orphans(orphans);
        }
    }

    /// Pushes buffered wrappers to the queue and returns how many went.
    ///
    /// Without `blocking` only what fits right now is moved.
    pub fn flush(&self, blocking: bool) -> usize {
        let (moved, orphans) = {
            let mut buf = self.buf.lock();
            self.flush_locked(&mut buf, blocking)
        };
        self.run_orphans(orphans);
        moved
    }

    /// Returns the number moved and the wrappers a closed queue refused.
    fn flush_locked(&self, buf: &mut Vec<Wrapper>, blocking: bool) -> (usize, Vec<Wrapper>) {
        if buf.is_empty() {
            return (0, Vec::new());
        }
        let moved = self.queue.push_batch(buf, blocking);
        if !buf.is_empty() && self.queue.is_closed() {
            return (moved, std::mem::take(buf));
        }
        (moved, Vec::new())
    }

    // Nobody drains a closed queue; finish the requests on this thread.
    fn run_orphans(&self, orphans: Vec<Wrapper>) {
        if orphans.is_empty() {
            return;
        }
        warn!(
            "completion queue of node {} is closed, running {} callbacks inline",
            self.node_id,
            orphans.len()
        );
        for wrapper in orphans {
            wrapper.run();
        }
    }

    pub fn num_buffered(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
