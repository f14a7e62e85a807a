//! Application computations shipped alongside a request.

use std::fmt;
use std::sync::Arc;

use super::io_buf::RawBuf;

/// A computation the application attaches to a request instead of a buffer.
///
/// Serialized requests always carry the computation's bytes inline; the
/// receiving side decodes them with its own knowledge of the concrete type.
pub trait UserCompute: Send + Sync {
    /// Writes the computation into `buf` and returns the number of bytes used.
    /// `buf` is at least `serialized_size()` bytes long.
    fn serialize_into(&self, buf: &mut [u8]) -> usize;

    fn serialized_size(&self) -> usize;
}

/// The compute payload of a request.
#[derive(Clone)]
pub enum ComputeRef {
    /// A live object owned by the application.
    Object(Arc<dyn UserCompute>),
    /// Serialized bytes inside a wire buffer the request was decoded from.
    Inline { buf: RawBuf, len: usize },
}

impl ComputeRef {
    pub fn serialized_size(&self) -> usize {
        match self {
            ComputeRef::Object(obj) => obj.serialized_size(),
            ComputeRef::Inline { len, .. } => *len,
        }
    }

    /// Writes the computation's bytes to the front of `buf`.
    pub fn serialize_into(&self, buf: &mut [u8]) -> usize {
        match self {
            ComputeRef::Object(obj) => obj.serialize_into(buf),
            ComputeRef::Inline { buf: src, len } => {
                // SAFETY: inline bytes belong to a wire buffer that outlives the
                // request view holding this reference.
                let src = unsafe { std::slice::from_raw_parts(src.as_ptr(), *len) };
                buf[..*len].copy_from_slice(src);
                *len
            }
        }
    }
}

impl fmt::Debug for ComputeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeRef::Object(obj) => write!(f, "Object({} bytes)", obj.serialized_size()),
            ComputeRef::Inline { buf, len } => write!(f, "Inline({buf:?}, {len})"),
        }
    }
}
