//! # Wire Codec
//!
//! Flattens a request into a byte buffer so it can cross a thread or NUMA
//! node boundary, and decodes it back without copying.
//!
//! ```text
//!  0        4        8                16               24        32        40
//!  +--------+--------+----------------+----------------+---------+---------+--------------
//!  |file_id | flags  | offset:48      | user_data:48   | owner:48| addr /  | inline bytes
//!  |  i32   |  u32   | size_lo:16     | size_hi:16     |         | inl len | (iff INLINE)
//!  +--------+--------+----------------+----------------+---------+---------+--------------
//!
//!  flags: kind:2 | inline:1 | access:1 | sync | high_prio | low_latency | discarded | node:8
//! ```
//!
//! All fields are little-endian. The last header word holds the buffer address
//! of a non-inline basic request, or the number of inline bytes when the
//! inline flag is set.

use std::ops::Deref;

use crate::common::config::{ADDR_BITS, ADDR_MASK, MAX_BUF_SIZE, MAX_INLINE_SIZE};
use crate::common::exception::{ProtocolViolation, WireError, fatal};

use super::io_buf::RawBuf;
use super::io_request::{AccessMethod, IoOwner, IoRequest, Payload, PayloadKind};
use super::user_compute::ComputeRef;

pub const HEADER_SIZE: usize = 40;

const KIND_MASK: u32 = 0x3;
const INLINE_BIT: u32 = 1 << 2;
const ACCESS_BIT: u32 = 1 << 3;
const SYNC_BIT: u32 = 1 << 4;
const HIGH_PRIO_BIT: u32 = 1 << 5;
const LOW_LATENCY_BIT: u32 = 1 << 6;
const DISCARDED_BIT: u32 = 1 << 7;
const NODE_SHIFT: u32 = 8;

const SIZE_HALF_BITS: u32 = 16;
const SIZE_HALF_MASK: u64 = (1 << SIZE_HALF_BITS) - 1;

/// What follows the header.
enum Body<'r> {
    None,
    Bytes(&'r [u8]),
    Compute(&'r ComputeRef),
}

/// A request decoded from a wire buffer.
///
/// Inline payloads point into the buffer, so the view cannot outlive it.
pub struct RequestView<'a> {
    req: IoRequest,
    inline: &'a [u8],
}

impl<'a> RequestView<'a> {
    /// Inline payload bytes, empty when the request was sent header-only.
    pub fn inline_data(&self) -> &'a [u8] {
        self.inline
    }

    /// Serialized computation of a compute request. Decoding is up to the application.
    pub fn compute_bytes(&self) -> Option<&'a [u8]> {
        match self.req.payload_kind() {
            PayloadKind::UserCompute => Some(self.inline),
            _ => None,
        }
    }
}

impl Deref for RequestView<'_> {
    type Target = IoRequest;

    fn deref(&self) -> &IoRequest {
        &self.req
    }
}

impl IoRequest {
    /// Bytes `serialize` writes when inlining is permitted.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.inline_len(true)
    }

    /// Writes the request to the front of `buf` and returns the bytes used.
    ///
    /// Extended requests go out header-only, as basic requests without a
    /// buffer. Small basic writes are inlined when `accept_inline` is set.
    /// Compute requests always carry their serialized computation.
    pub fn serialize(&self, buf: &mut [u8], accept_inline: bool) -> Result<usize, WireError> {
        let needed = HEADER_SIZE + self.inline_len(accept_inline);
        if buf.len() < needed {
            return Err(WireError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }

        let (header, tail) = buf.split_at_mut(HEADER_SIZE);
        match self.body(accept_inline) {
            Body::None => match &self.payload {
                Payload::Extended(ext) => {
                    self.write_header(header, PayloadKind::Basic, false, ext.size(), 0)
                }
                Payload::Basic(addr) => {
                    self.write_header(header, PayloadKind::Basic, false, self.size(), addr.addr())
                }
                Payload::UserCompute(_) => unreachable!("compute requests always carry a body"),
            },
            Body::Bytes(bytes) => {
                tail[..bytes.len()].copy_from_slice(bytes);
                self.write_header(header, PayloadKind::Basic, true, self.size(), bytes.len() as u64);
            }
            Body::Compute(compute) => {
                let len = compute.serialize_into(&mut tail[..needed - HEADER_SIZE]);
                self.write_header(header, PayloadKind::UserCompute, true, self.size(), len as u64);
            }
        }
        Ok(needed)
    }

    /// Decodes a request from the front of `buf` without copying its payload.
    pub fn deserialize(buf: &[u8]) -> Result<RequestView<'_>, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let file_id = i32::from_le_bytes(word(buf, 0));
        let flags = u32::from_le_bytes(word(buf, 4));
        let off_word = u64::from_le_bytes(word(buf, 8));
        let user_word = u64::from_le_bytes(word(buf, 16));
        let owner = u64::from_le_bytes(word(buf, 24)) & ADDR_MASK;
        let last = u64::from_le_bytes(word(buf, 32));

        let inline = flags & INLINE_BIT != 0;
        let kind = flags & KIND_MASK;
        let inline_len = if inline {
            usize::try_from(last).unwrap_or(usize::MAX)
        } else {
            0
        };
        let needed = HEADER_SIZE.saturating_add(inline_len);
        if buf.len() < needed {
            return Err(WireError::Truncated {
                needed,
                available: buf.len(),
            });
        }
        let bytes = &buf[HEADER_SIZE..needed];

        let buf_size = (off_word >> ADDR_BITS) | ((user_word >> ADDR_BITS) << SIZE_HALF_BITS);

        let payload = match (kind, inline) {
            // The request size is later used to slice the inline bytes.
            (0, true) if buf_size != inline_len as u64 => {
                return Err(WireError::InlineSizeMismatch {
                    buf_size: buf_size as usize,
                    inline_len,
                });
            }
            (0, true) => Payload::Basic(RawBuf::from_ptr(bytes.as_ptr() as *mut u8)),
            (0, false) => Payload::Basic(RawBuf::from_ptr(last as usize as *mut u8)),
            (2, true) => Payload::UserCompute(ComputeRef::Inline {
                buf: RawBuf::from_ptr(bytes.as_ptr() as *mut u8),
                len: inline_len,
            }),
            _ => return Err(WireError::InvalidPayloadKind(kind)),
        };

        // Sign-extend the 48-bit offset.
        let offset = ((off_word << (64 - ADDR_BITS)) as i64) >> (64 - ADDR_BITS);

        let req = IoRequest {
            file_id,
            offset,
            buf_size: buf_size as u32,
            user_data: user_word & ADDR_MASK,
            access_method: AccessMethod::from_bit((flags & ACCESS_BIT) >> 3),
            sync: flags & SYNC_BIT != 0,
            high_prio: flags & HIGH_PRIO_BIT != 0,
            low_latency: flags & LOW_LATENCY_BIT != 0,
            discarded: flags & DISCARDED_BIT != 0,
            node_id: (flags >> NODE_SHIFT) as u8,
            owner: IoOwner::new(owner),
            data_inline: inline,
            payload,
        };
        Ok(RequestView { req, inline: bytes })
    }

    fn body(&self, accept_inline: bool) -> Body<'_> {
        match &self.payload {
            // Decoded requests already hold their bytes; send them on as they came.
            Payload::Basic(addr) if self.data_inline => {
                // SAFETY: inline bytes live in the wire buffer the request was decoded from.
                Body::Bytes(unsafe { std::slice::from_raw_parts(addr.as_ptr(), self.size()) })
            }
            Payload::Extended(_) => Body::None,
            Payload::Basic(addr)
                if accept_inline
                    && self.access_method == AccessMethod::Write
                    && self.size() <= MAX_INLINE_SIZE
                    && !addr.is_null() =>
            {
                // SAFETY: the caller keeps the buffer of an issued write alive and unchanged.
                Body::Bytes(unsafe { std::slice::from_raw_parts(addr.as_ptr(), self.size()) })
            }
            Payload::Basic(_) => Body::None,
            Payload::UserCompute(compute) => Body::Compute(compute),
        }
    }

    fn inline_len(&self, accept_inline: bool) -> usize {
        match self.body(accept_inline) {
            Body::None => 0,
            Body::Bytes(bytes) => bytes.len(),
            Body::Compute(compute) => compute.serialized_size(),
        }
    }

    fn write_header(
        &self,
        out: &mut [u8],
        kind: PayloadKind,
        inline: bool,
        buf_size: usize,
        last: u64,
    ) {
        if buf_size > MAX_BUF_SIZE {
            fatal(ProtocolViolation::BufferTooLarge(buf_size));
        }
        let size = buf_size as u64;

        let mut flags = kind as u32;
        if inline {
            flags |= INLINE_BIT;
        }
        if self.access_method == AccessMethod::Write {
            flags |= ACCESS_BIT;
        }
        if self.sync {
            flags |= SYNC_BIT;
        }
        if self.high_prio {
            flags |= HIGH_PRIO_BIT;
        }
        if self.low_latency {
            flags |= LOW_LATENCY_BIT;
        }
        if self.discarded {
            flags |= DISCARDED_BIT;
        }
        flags |= (self.node_id as u32) << NODE_SHIFT;

        let off_word = (self.offset as u64 & ADDR_MASK) | ((size & SIZE_HALF_MASK) << ADDR_BITS);
        let user_word = (self.user_data & ADDR_MASK) | ((size >> SIZE_HALF_BITS) << ADDR_BITS);

        out[0..4].copy_from_slice(&self.file_id.to_le_bytes());
        out[4..8].copy_from_slice(&flags.to_le_bytes());
        out[8..16].copy_from_slice(&off_word.to_le_bytes());
        out[16..24].copy_from_slice(&user_word.to_le_bytes());
        out[24..32].copy_from_slice(&self.owner.id().to_le_bytes());
        out[32..40].copy_from_slice(&last.to_le_bytes());
    }
}

fn word<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}
