use std::sync::Arc;
use std::thread;

use flash_aio::common::config::{DEFAULT_RAID_BLOCK_PAGES, PAGE_SIZE};
use flash_aio::storage::disk::async_disk::request::{
    AccessMethod, DataLoc, IoOwner, IoRequest, RawBuf, RequestExtension, RequestPtr,
    process_reqs_on_io,
};
use flash_aio::storage::page::page_frame::PageFrame;

const RAID_BLOCK: usize = DEFAULT_RAID_BLOCK_PAGES * PAGE_SIZE;

/// Cuts `req` at RAID block boundaries.
fn split_on_raid_blocks(req: &IoRequest) -> Vec<IoRequest> {
    let mut parts = Vec::new();
    let end = req.offset() + req.size() as i64;
    let mut off = req.offset();
    while off < end {
        let block_end = (off / RAID_BLOCK as i64 + 1) * RAID_BLOCK as i64;
        let size = (block_end.min(end) - off) as usize;
        let mut part = IoRequest::default();
        req.extract(off, size, &mut part);
        parts.push(part);
        off += size as i64;
    }
    parts
}

#[test]
fn request_is_split_on_raid_blocks() {
    let mut buf = vec![0u8; 3 * RAID_BLOCK];
    let base = buf.as_mut_ptr();
    let start = (RAID_BLOCK - 2 * PAGE_SIZE) as i64;
    let req = IoRequest::new_basic(
        RawBuf::from_slice(&mut buf[..RAID_BLOCK + 4 * PAGE_SIZE]),
        DataLoc::new(3, start),
        RAID_BLOCK + 4 * PAGE_SIZE,
        AccessMethod::Read,
        IoOwner::new(11),
        2,
    );
    assert!(!req.inside_raid_block(DEFAULT_RAID_BLOCK_PAGES));

    let parts = split_on_raid_blocks(&req);
    assert_eq!(parts.len(), 3);
    assert_eq!(
        parts.iter().map(IoRequest::size).collect::<Vec<_>>(),
        vec![2 * PAGE_SIZE, RAID_BLOCK, 2 * PAGE_SIZE]
    );
    for part in &parts {
        assert!(part.inside_raid_block(DEFAULT_RAID_BLOCK_PAGES));
        assert_eq!(part.file_id(), 3);
        assert_eq!(part.owner(), IoOwner::new(11));
        assert_eq!(part.node_id(), 2);
        let delta = (part.offset() - start) as usize;
        assert_eq!(part.buf(0).as_ptr(), unsafe { base.add(delta) });
    }
    assert_eq!(parts.iter().map(IoRequest::size).sum::<usize>(), req.size());
}

#[test]
fn requests_are_grouped_by_owner() {
    let reqs: Vec<_> = [1u64, 2, 1, 3, 2, 1]
        .iter()
        .enumerate()
        .map(|(i, &owner)| {
            IoRequest::new_basic(
                RawBuf::null(),
                DataLoc::new(0, (i * PAGE_SIZE) as i64),
                0,
                AccessMethod::Read,
                IoOwner::new(owner),
                0,
            )
        })
        .collect();
    let refs: Vec<&IoRequest> = reqs.iter().collect();

    let mut groups = Vec::new();
    process_reqs_on_io(&refs, |owner, group| {
        groups.push((owner.id(), group.iter().map(|r| r.offset()).collect::<Vec<_>>()));
    });
    let p = PAGE_SIZE as i64;
    assert_eq!(
        groups,
        vec![(1, vec![0, 2 * p, 5 * p]), (2, vec![p, 4 * p]), (3, vec![3 * p])]
    );
}

#[test]
fn partial_requests_complete_their_parent() {
    let frames: Vec<_> = (0..4).map(|i| Arc::new(PageFrame::with_offset(i * PAGE_SIZE as i64))).collect();
    let mut parent = IoRequest::new_extended(
        Box::new(RequestExtension::new()),
        DataLoc::new(0, 0),
        AccessMethod::Read,
        IoOwner::NONE,
        0,
    );
    for frame in &frames {
        parent.add_page(Arc::clone(frame));
    }
    assert_eq!(parent.size(), 4 * PAGE_SIZE);
    assert_eq!(parent.num_bufs(), 4);

    // One child per page, each holding a reference on the parent.
    let children: Vec<_> = frames
        .iter()
        .map(|frame| {
            let mut child = IoRequest::new_extended(
                Box::new(RequestExtension::new()),
                DataLoc::new(0, frame.offset()),
                AccessMethod::Read,
                IoOwner::NONE,
                0,
            );
            child.add_page(Arc::clone(frame));
            child.set_partial(true);
            child.set_orig(Some(RequestPtr::new(&parent)));
            parent.inc_complete_count();
            child
        })
        .collect();

    thread::scope(|s| {
        for child in &children {
            s.spawn(move || {
                let orig = child.orig().expect("parent");
                // SAFETY: the parent outlives the scope.
                let parent = unsafe { orig.as_ref() };
                parent.complete_size(child.size());
                parent.dec_complete_count();
            });
        }
        parent.wait4unref();
    });

    assert!(parent.is_complete());
    assert_eq!(parent.completed_size(), 4 * PAGE_SIZE);
    assert_eq!(parent.complete_count(), 0);
}

#[test]
fn pages_can_be_prepended() {
    let frames: Vec<_> = (0..3).map(|i| Arc::new(PageFrame::with_offset(i * PAGE_SIZE as i64))).collect();
    let mut req = IoRequest::new_extended(
        Box::new(RequestExtension::new()),
        DataLoc::new(0, PAGE_SIZE as i64),
        AccessMethod::Write,
        IoOwner::NONE,
        0,
    );
    req.add_page(Arc::clone(&frames[1]));
    req.add_page(Arc::clone(&frames[2]));
    req.add_page_front(Arc::clone(&frames[0]));
    req.set_data_loc(DataLoc::new(0, 0));

    assert_eq!(req.num_bufs(), 3);
    for (i, frame) in frames.iter().enumerate() {
        assert!(Arc::ptr_eq(req.page(i).expect("page"), frame));
    }
    let iovecs = req.io_vecs();
    assert_eq!(iovecs.len(), 3);
    assert!(iovecs.iter().all(|(_, len)| *len == PAGE_SIZE));
}
