//! Per-thread NUMA node identity.
//!
//! Node discovery and CPU pinning belong to process bootstrap. This module only
//! records which node the current thread runs on, so completions can be routed
//! to a local queue when the reaping thread already sits on the request's node.

use std::cell::Cell;

use crate::common::config::{MAX_NODE_ID, NodeId};
use crate::common::exception::{ProtocolViolation, fatal};

thread_local! {
    static CURRENT_NODE: Cell<Option<NodeId>> = const { Cell::new(None) };
}

/// Marks the calling thread as running on `node_id`.
pub fn bind_current_thread(node_id: NodeId) {
    if node_id > MAX_NODE_ID {
        fatal(ProtocolViolation::NodeIdOutOfRange(node_id));
    }
    CURRENT_NODE.with(|n| n.set(Some(node_id)));
}

/// Forgets the node binding of the calling thread.
pub fn unbind_current_thread() {
    CURRENT_NODE.with(|n| n.set(None));
}

/// Node of the calling thread, if it was bound.
pub fn current_node() -> Option<NodeId> {
    CURRENT_NODE.with(|n| n.get())
}
