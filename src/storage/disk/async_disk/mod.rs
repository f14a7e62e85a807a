//! Async Disk Module
//!
//! Request-level asynchronous I/O for flash storage.
//!
//! # Submodules
//!
//! - [`request`]: the I/O request model and its wire encoding.
//! - [`io`]: the engine that issues requests and routes their completions.

pub mod io;
pub mod request;

pub use io::{AsyncIoEngine, CompletionThread, IoCallback, IoStatus, LogicalFilePartition};
pub use request::{AccessMethod, DataLoc, IoOwner, IoRequest};
