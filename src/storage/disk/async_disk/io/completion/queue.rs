//! Blocking FIFO of completed wrappers for one NUMA node.

use std::collections::VecDeque;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::common::config::{AIO_DEPTH_PER_FILE, NodeId};
use crate::storage::disk::async_disk::io::callback::CompletionCallbackWrapper;

type Wrapper = Box<CompletionCallbackWrapper>;

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Wrapper>,
    closed: bool,
}

/// Completed requests waiting for their callbacks.
///
/// Producers block while the queue holds `max_size` wrappers. The number of
/// completions is bounded by the requests users issued, so the default bound
/// is effectively unlimited.
#[derive(Debug)]
pub struct CompletionQueue {
    node_id: NodeId,
    max_size: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl CompletionQueue {
    pub fn new(node_id: NodeId) -> Self {
        Self::with_max_size(node_id, usize::MAX)
    }

    pub fn with_max_size(node_id: NodeId, max_size: usize) -> Self {
        Self {
            node_id,
            max_size: max_size.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(AIO_DEPTH_PER_FILE),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends one wrapper, waiting for room. A closed queue hands it back.
    pub fn push(&self, wrapper: Wrapper) -> Result<(), Wrapper> {
        let mut state = self.state.lock();
        while state.items.len() >= self.max_size && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(wrapper);
        }
        state.items.push_back(wrapper);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Moves wrappers from the front of `batch` into the queue and returns how many moved.
    ///
    /// Without `blocking` only the free room is used. With it the call waits
    /// until everything moved or the queue closed.
    pub fn push_batch(&self, batch: &mut Vec<Wrapper>, blocking: bool) -> usize {
        let mut moved = 0;
        let mut state = self.state.lock();
        while moved < batch.len() && !state.closed {
            let room = self.max_size - state.items.len();
            if room == 0 {
                if !blocking {
                    break;
                }
                self.not_full.wait(&mut state);
                continue;
            }
            let n = room.min(batch.len() - moved);
            state.items.extend(batch.drain(..n));
            moved += n;
            self.not_empty.notify_all();
        }
        trace!("completion queue {}: pushed {} wrappers", self.node_id, moved);
        moved
    }

    /// Runs the callbacks of up to `max` queued wrappers and returns how many ran.
    ///
    /// With `blocking` the call waits for at least one wrapper unless the queue
    /// is closed. Callbacks run outside the lock.
    pub fn process(&self, max: usize, blocking: bool) -> usize {
        let batch: Vec<Wrapper> = {
            let mut state = self.state.lock();
            while blocking && state.items.is_empty() && !state.closed {
                self.not_empty.wait(&mut state);
            }
            let n = max.min(state.items.len());
            let batch = state.items.drain(..n).collect();
            if n > 0 {
                self.not_full.notify_all();
            }
            batch
        };
        let n = batch.len();
        for wrapper in batch {
            wrapper.run();
        }
        n
    }

    /// Wakes every waiter. Queued wrappers can still be processed; new ones are refused.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
