//! # Completion Pipeline
//!
//! Kernel completions are reaped on whatever thread polls the engine, but
//! callbacks run on a thread of the request's NUMA node:
//!
//! ```text
//!  reaping thread (node A)
//!     |-- request for node A ----------------------> CompletionQueue(A)
//!     |-- request for node B --> CompletionSender(B) ==batch==> CompletionQueue(B)
//!     `-- node without a thread --> callback runs inline
//!
//!  CompletionThread(X): loop { CompletionQueue(X).process() }  -> callback, wrapper back to its slab
//! ```

pub mod queue;
pub mod sender;
pub mod thread;

pub use queue::CompletionQueue;
pub use sender::CompletionSender;
pub use thread::CompletionThread;
