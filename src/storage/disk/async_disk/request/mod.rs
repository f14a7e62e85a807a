//! # I/O Requests
//!
//! The request model shared by every layer that issues I/O:
//!
//! - **`data_loc`**: `(file id, offset)` pairs.
//! - **`io_buf`**: buffer descriptors (raw memory or a cache page).
//! - **`extension`**: buffer lists and completion tracking of extended requests.
//! - **`ref_count`**: completion reference count with a blocking wait.
//! - **`io_request`**: `IoRequest` itself.
//! - **`user_compute`**: computations carried in place of a buffer.
//! - **`wire`**: the flat encoding used to pass requests between threads.

pub mod data_loc;
pub mod extension;
pub mod io_buf;
pub mod io_request;
pub mod ref_count;
pub mod user_compute;
pub mod wire;

pub use data_loc::{DataLoc, INVALID_DATA_LOC};
pub use extension::RequestExtension;
pub use io_buf::{IoBuf, RawBuf};
pub use io_request::{AccessMethod, IoOwner, IoRequest, PayloadKind, RequestPtr, process_reqs_on_io};
pub use ref_count::RefCount;
pub use user_compute::{ComputeRef, UserCompute};
pub use wire::{HEADER_SIZE, RequestView};
