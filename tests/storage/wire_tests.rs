use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use flash_aio::common::config::{MAX_INLINE_SIZE, PAGE_SIZE};
use flash_aio::storage::disk::async_disk::request::{
    AccessMethod, DataLoc, HEADER_SIZE, IoOwner, IoRequest, PayloadKind, RawBuf, UserCompute,
};

struct Checksum {
    seed: u32,
    pages: u32,
}

impl UserCompute for Checksum {
    fn serialize_into(&self, buf: &mut [u8]) -> usize {
        buf[..4].copy_from_slice(&self.seed.to_le_bytes());
        buf[4..8].copy_from_slice(&self.pages.to_le_bytes());
        8
    }

    fn serialized_size(&self) -> usize {
        8
    }
}

/// Packs `reqs` back to back into one message.
fn pack(reqs: &[IoRequest]) -> Vec<u8> {
    let total: usize = reqs.iter().map(IoRequest::serialized_size).sum();
    let mut msg = vec![0u8; total];
    let mut pos = 0;
    for req in reqs {
        pos += req.serialize(&mut msg[pos..], true).expect("fits");
    }
    msg.truncate(pos);
    msg
}

#[test]
fn batches_cross_threads_in_one_message() {
    let small: Vec<u8> = (0..64u8).collect();
    let big = vec![0xEEu8; PAGE_SIZE];
    let big_addr = big.as_ptr() as u64;

    let (tx, rx) = bounded::<Vec<u8>>(1);
    let consumer = thread::spawn(move || {
        let msg = rx.recv().expect("message");
        let mut pos = 0;
        let mut seen = Vec::new();
        while pos < msg.len() {
            let view = IoRequest::deserialize(&msg[pos..]).expect("decodes");
            pos += HEADER_SIZE + view.inline_data().len();
            seen.push((
                view.offset(),
                view.size(),
                view.payload_kind(),
                view.is_data_inline(),
                view.inline_data().to_vec(),
                view.compute_bytes().map(<[u8]>::to_vec),
                view.buf(0).addr(),
                view.node_id(),
            ));
        }
        seen
    });

    let mut small_buf = small.clone();
    let reqs = vec![
        IoRequest::new_basic(
            RawBuf::from_slice(&mut small_buf),
            DataLoc::new(1, 4096),
            small.len(),
            AccessMethod::Write,
            IoOwner::new(5),
            1,
        ),
        IoRequest::new_basic(
            RawBuf::from_ptr(big.as_ptr() as *mut u8),
            DataLoc::new(1, 8192),
            big.len(),
            AccessMethod::Write,
            IoOwner::new(5),
            2,
        ),
        IoRequest::new_user_compute(
            Arc::new(Checksum { seed: 7, pages: 3 }),
            DataLoc::new(2, 0),
            3 * PAGE_SIZE,
            AccessMethod::Read,
            IoOwner::new(6),
            3,
        ),
    ];
    let msg = pack(&reqs);
    assert_eq!(msg.len(), 3 * HEADER_SIZE + small.len() + 8);
    tx.send(msg).unwrap();

    let seen = consumer.join().unwrap();
    assert_eq!(seen.len(), 3);

    let (off, size, kind, inline, data, compute, _, node) = &seen[0];
    assert_eq!((*off, *size, *kind, *inline, *node), (4096, 64, PayloadKind::Basic, true, 1));
    assert_eq!(data, &small);
    assert!(compute.is_none());

    // Too large to inline: the address travels instead.
    let (off, size, kind, inline, data, _, addr, node) = &seen[1];
    assert_eq!((*off, *size, *kind, *inline, *node), (8192, PAGE_SIZE, PayloadKind::Basic, false, 2));
    assert!(data.is_empty());
    assert_eq!(*addr, big_addr);

    let (_, size, kind, _, _, compute, _, node) = &seen[2];
    assert_eq!((*size, *kind, *node), (3 * PAGE_SIZE, PayloadKind::UserCompute, 3));
    let bytes = compute.as_ref().expect("compute bytes");
    assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), 7);
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
}

#[test]
fn decoded_requests_forward_unchanged() {
    let mut payload = vec![0x42u8; MAX_INLINE_SIZE];
    let mut req = IoRequest::new_basic(
        RawBuf::from_slice(&mut payload),
        DataLoc::new(9, 512),
        MAX_INLINE_SIZE,
        AccessMethod::Write,
        IoOwner::new(77),
        4,
    );
    req.set_user_data(0xBEEF);
    req.set_low_latency(true);

    let first = pack(std::slice::from_ref(&req));
    let view = IoRequest::deserialize(&first).unwrap();

    // A relay thread forwards what it received without looking at the payload.
    let mut second = vec![0u8; view.serialized_size()];
    let n = view.serialize(&mut second, false).unwrap();
    assert_eq!(&second[..n], &first[..]);

    let again = IoRequest::deserialize(&second).unwrap();
    assert_eq!(again.inline_data(), &payload[..]);
    assert_eq!(again.user_data(), 0xBEEF);
    assert!(again.is_low_latency());
    assert_eq!(again.owner(), IoOwner::new(77));
}
