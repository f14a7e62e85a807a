//! # Asynchronous I/O Engine
//!
//! Issues `IoRequest` batches to the kernel and delivers completions to the
//! NUMA node that owns each request.
//!
//! ## Modules
//!
//! - **`engine`**: `AsyncIoEngine`, the submission and reaping entry point.
//! - **`kernel`**: kernel AIO backends (native libaio, thread-emulated).
//! - **`callback`**: completion callbacks and the wrapper carrying a request through the kernel.
//! - **`slab`**: per-engine pool of completion wrappers.
//! - **`completion`**: per-node completion queues, threads and buffered senders.
//! - **`partition`**: the physical files an engine serves.
//! - **`metrics`**: submission, completion and latency counters.

pub mod callback;
pub mod completion;
pub mod engine;
pub mod kernel;
pub mod metrics;
pub mod partition;
pub mod slab;

pub use callback::{CompletionCallbackWrapper, CompletionOwner, IoCallback, IoStatus};
pub use completion::{CompletionQueue, CompletionSender, CompletionThread};
pub use engine::AsyncIoEngine;
pub use kernel::{ControlBlock, KernelAio, KernelEvent};
pub use metrics::{EngineMetrics, EngineStats};
pub use partition::{FileSpec, LogicalFilePartition, OpenFile};
pub use slab::CallbackSlabAllocator;
