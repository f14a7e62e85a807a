use std::fmt;
use std::io;

use log::error;
use thiserror::Error;

use crate::common::config::{FileId, NodeId};

/// Recoverable errors returned by the asynchronous I/O engine.
#[derive(Error, Debug)]
pub enum AioError {
    #[error("operation not supported by an asynchronous engine; submit request batches instead")]
    UnsupportedOperation,
    #[error("kernel accepted {accepted} of {requested} requests")]
    PartialSubmission { accepted: usize, requested: usize },
    #[error("file {0} is not registered with this engine")]
    FileNotFound(FileId),
    #[error("file {0} is already open")]
    FileAlreadyOpen(FileId),
    #[error("engine has been cleaned up")]
    Shutdown,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while encoding or decoding a request on the wire.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("wire buffer holds {available} bytes, {needed} needed")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("wire buffer truncated: {available} bytes, request needs {needed}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid payload kind {0} on the wire")]
    InvalidPayloadKind(u32),
    #[error("inline request claims {buf_size} bytes but carries {inline_len}")]
    InlineSizeMismatch { buf_size: usize, inline_len: usize },
}

/// Programmer errors in request construction or engine use. Never recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    ExtractOutOfRange { req_off: i64, req_size: usize, off: i64, size: usize },
    ExtractMultiBuffer { num_bufs: usize },
    NotExtended,
    NodeIdOutOfRange(NodeId),
    OverCompleted { completed: usize, total: usize },
    RefCountUnderflow,
    BufferTooLarge(usize),
    FieldOverflow { field: &'static str, value: u64 },
    PagedBufferSize(usize),
    IncompatibleCopy,
    ReturnWithLiveRefs(i32),
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::ExtractOutOfRange { req_off, req_size, off, size } => write!(
                f,
                "extract range [{off:#x}, +{size:#x}) does not overlap request [{req_off:#x}, +{req_size:#x})"
            ),
            ProtocolViolation::ExtractMultiBuffer { num_bufs } => {
                write!(f, "extract needs a single-buffer request, got {num_bufs} buffers")
            }
            ProtocolViolation::NotExtended => {
                write!(f, "extension-only operation on a non-extended request")
            }
            ProtocolViolation::NodeIdOutOfRange(node) => write!(f, "node id {node} out of range"),
            ProtocolViolation::OverCompleted { completed, total } => {
                write!(f, "completed {completed} bytes of a {total}-byte request")
            }
            ProtocolViolation::RefCountUnderflow => write!(f, "completion count dropped below zero"),
            ProtocolViolation::BufferTooLarge(size) => write!(f, "buffer size {size} too large"),
            ProtocolViolation::FieldOverflow { field, value } => {
                write!(f, "{field} {value:#x} does not fit in 48 bits")
            }
            ProtocolViolation::PagedBufferSize(size) => {
                write!(f, "page buffer must be exactly one page, got {size} bytes")
            }
            ProtocolViolation::IncompatibleCopy => {
                write!(f, "cannot copy an extended or compute request into this request")
            }
            ProtocolViolation::ReturnWithLiveRefs(refs) => {
                write!(f, "callback returned to the slab with {refs} live references")
            }
        }
    }
}

/// Fatal conditions: the engine cannot continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    Protocol(ProtocolViolation),
    ResourceExhaustion { node_id: NodeId, max_size: usize },
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Protocol(v) => write!(f, "protocol violation: {v}"),
            FatalError::ResourceExhaustion { node_id, max_size } => write!(
                f,
                "callback slab on node {node_id} exhausted ({max_size} wrappers in use)"
            ),
        }
    }
}

impl From<ProtocolViolation> for FatalError {
    fn from(v: ProtocolViolation) -> Self {
        FatalError::Protocol(v)
    }
}

/// Logs the fatal condition and aborts the current thread.
#[cold]
#[track_caller]
pub fn fatal(err: impl Into<FatalError>) -> ! {
    let err = err.into();
    error!("{err}");
    panic!("{err}");
}
