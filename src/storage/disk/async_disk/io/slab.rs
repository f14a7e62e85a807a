//! Pool of completion wrappers.
//!
//! Wrappers are boxed once and recycled through a free list, so issuing and
//! completing a request does not touch the allocator. The pool grows by
//! `increase_size` wrappers at a time and never beyond `max_size`.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use parking_lot::Mutex;

use super::callback::CompletionCallbackWrapper;
use crate::common::config::NodeId;
use crate::common::exception::{FatalError, ProtocolViolation, fatal};

#[derive(Debug)]
pub struct CallbackSlabAllocator {
    node_id: NodeId,
    increase_size: usize,
    max_size: usize,
    free: Mutex<Vec<Box<CompletionCallbackWrapper>>>,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

impl CallbackSlabAllocator {
    pub fn new(node_id: NodeId, increase_size: usize, max_size: usize) -> Self {
        Self {
            node_id,
            increase_size: increase_size.max(1),
            max_size,
            free: Mutex::new(Vec::with_capacity(increase_size)),
            created: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Hands out a wrapper whose request extension is freshly initialized.
    pub fn alloc(&self) -> Box<CompletionCallbackWrapper> {
        let mut free = self.free.lock();
        if free.is_empty() {
            self.grow(&mut free);
        }
        let Some(mut wrapper) = free.pop() else {
            fatal(FatalError::ResourceExhaustion {
                node_id: self.node_id,
                max_size: self.max_size,
            });
        };
        drop(free);

        wrapper.req_mut().reset();
        self.in_use.fetch_add(1, Ordering::Relaxed);
        wrapper
    }

    /// Takes a wrapper back. Its completion reference count must be zero.
    pub fn free(&self, mut wrapper: Box<CompletionCallbackWrapper>) {
        let refs = wrapper.req().complete_count();
        if refs != 0 {
            fatal(ProtocolViolation::ReturnWithLiveRefs(refs));
        }
        wrapper.clear();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().push(wrapper);
    }

    fn grow(&self, free: &mut Vec<Box<CompletionCallbackWrapper>>) {
        let created = self.created.load(Ordering::Relaxed);
        let n = self.increase_size.min(self.max_size.saturating_sub(created));
        if n == 0 {
            return;
        }
        free.extend((0..n).map(|_| Box::new(CompletionCallbackWrapper::new())));
        self.created.store(created + n, Ordering::Relaxed);
        debug!(
            "callback slab on node {} grew by {} to {} wrappers",
            self.node_id,
            n,
            created + n
        );
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Wrappers created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn num_free(&self) -> usize {
        self.free.lock().len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
