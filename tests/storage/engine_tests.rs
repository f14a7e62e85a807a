use std::sync::Arc;
use std::sync::atomic::Ordering;

use flash_aio::common::config::{AioBackend, AioConfig, PAGE_SIZE};
use flash_aio::common::exception::AioError;
use flash_aio::storage::disk::async_disk::io::{AsyncIoEngine, LogicalFilePartition};
use flash_aio::storage::disk::async_disk::request::{
    AccessMethod, DataLoc, IoOwner, IoRequest, RawBuf, RequestExtension,
};
use flash_aio::storage::disk::direct_io::AlignedBuffer;
use flash_aio::storage::page::page_frame::PageFrame;
use tempfile::TempDir;

use crate::common::fixtures::{EngineContext, filled_page, page_req};

#[test]
fn depth_bounds_each_batch() {
    let ctx = EngineContext::new(1, 4, &[]);
    let bufs: Vec<_> = (0..8).map(|i| filled_page(i as u8)).collect();
    let reqs: Vec<_> = bufs
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 0))
        .collect();

    let accepted = assert_ok!(ctx.engine.access(&reqs));
    assert!(accepted <= 4);
    assert_eq!(ctx.engine.num_pending_ios(), accepted);

    ctx.drain();
    assert_ok!(ctx.engine.access_all(&reqs[accepted..]));
    ctx.drain();

    assert_eq!(ctx.completed.load(Ordering::SeqCst), 8);
    assert_eq!(ctx.engine.num_available_io_slots(), 4);
}

#[test]
fn depth_scales_with_partition_size() {
    let ctx = EngineContext::new(3, 2, &[]);
    assert_eq!(ctx.engine.queue_depth(), 6);
    assert_eq!(ctx.engine.file_id(), 0);
}

#[test]
fn writes_are_read_back_across_files() {
    let ctx = EngineContext::new(2, 8, &[]);
    let pages: Vec<_> = (0..16).map(|i| filled_page(0x10 + i as u8)).collect();
    let writes: Vec<_> = pages
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, (i % 2) as i32, i / 2, AccessMethod::Write, 0))
        .collect();
    assert_ok!(ctx.engine.access_all(&writes));
    ctx.drain();

    let out: Vec<_> = (0..16).map(|_| AlignedBuffer::page_aligned(PAGE_SIZE)).collect();
    let reads: Vec<_> = out
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, (i % 2) as i32, i / 2, AccessMethod::Read, 0))
        .collect();
    assert_ok!(ctx.engine.access_all(&reads));
    ctx.drain();

    for (i, b) in out.iter().enumerate() {
        assert!(b.as_slice().iter().all(|&x| x == 0x10 + i as u8), "page {i}");
    }
    let stats = ctx.engine.stats();
    assert_eq!(stats.bytes_written, 16 * PAGE_SIZE as u64);
    assert_eq!(stats.bytes_read, 16 * PAGE_SIZE as u64);
    assert_eq!(stats.failed, 0);
}

#[test]
fn vectored_write_lands_contiguously() {
    let ctx = EngineContext::new(1, 4, &[]);
    let parts: Vec<_> = (0..3).map(|i| filled_page(0xA0 + i)).collect();

    let mut req = IoRequest::new_extended(
        Box::new(RequestExtension::new()),
        DataLoc::new(0, 0),
        AccessMethod::Write,
        IoOwner::NONE,
        0,
    );
    for p in &parts {
        req.add_buf(RawBuf::from_ptr(p.as_mut_ptr()), p.len());
    }
    assert_eq!(req.size(), 3 * PAGE_SIZE);
    assert_ok!(ctx.engine.access_all(std::slice::from_ref(&req)));
    ctx.drain();

    let out = AlignedBuffer::page_aligned(3 * PAGE_SIZE);
    let read = IoRequest::new_basic(
        RawBuf::from_ptr(out.as_mut_ptr()),
        DataLoc::new(0, 0),
        out.len(),
        AccessMethod::Read,
        IoOwner::NONE,
        0,
    );
    assert_ok!(ctx.engine.access_all(std::slice::from_ref(&read)));
    ctx.drain();

    for (i, chunk) in out.as_slice().chunks(PAGE_SIZE).enumerate() {
        assert!(chunk.iter().all(|&x| x == 0xA0 + i as u8));
    }
}

#[test]
fn reads_fill_cache_pages() {
    let ctx = EngineContext::new(1, 4, &[]);
    let src = filled_page(0x5C);
    assert_ok!(ctx.engine.access_all(&[page_req(&src, 0, 2, AccessMethod::Write, 0)]));
    ctx.drain();

    let frame = Arc::new(PageFrame::with_offset(2 * PAGE_SIZE as i64));
    let mut req = IoRequest::new_extended(
        Box::new(RequestExtension::new()),
        DataLoc::new(0, frame.offset()),
        AccessMethod::Read,
        IoOwner::NONE,
        0,
    );
    req.add_page(Arc::clone(&frame));
    assert_ok!(ctx.engine.access_all(std::slice::from_ref(&req)));
    ctx.drain();

    assert!(frame.data().iter().all(|&x| x == 0x5C));
}

#[test]
fn short_read_past_end_of_file() {
    let ctx = EngineContext::new(1, 4, &[]);
    let src = filled_page(1);
    assert_ok!(ctx.engine.access_all(&[page_req(&src, 0, 0, AccessMethod::Write, 0)]));
    ctx.drain();

    // Two pages requested, one on disk.
    let out = AlignedBuffer::page_aligned(2 * PAGE_SIZE);
    let read = IoRequest::new_basic(
        RawBuf::from_ptr(out.as_mut_ptr()),
        DataLoc::new(0, 0),
        out.len(),
        AccessMethod::Read,
        IoOwner::NONE,
        0,
    );
    assert_ok!(ctx.engine.access_all(std::slice::from_ref(&read)));
    ctx.drain();

    let stats = ctx.engine.stats();
    assert_eq!(stats.bytes_read, PAGE_SIZE as u64);
    assert_eq!(stats.short, 1);
    assert_eq!(stats.failed, 0);
    // The write succeeded; the half-filled read is reported as not ok.
    assert_eq!(ctx.completed.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.failed.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_file_is_rejected() {
    let ctx = EngineContext::new(1, 4, &[]);
    let buf = filled_page(0);
    assert_err!(
        ctx.engine.access(&[page_req(&buf, 7, 0, AccessMethod::Write, 0)]),
        AioError::FileNotFound(7)
    );
    assert_err!(
        ctx.engine.access_one(RawBuf::null(), 0, 0, AccessMethod::Read),
        AioError::UnsupportedOperation
    );
}

#[test]
fn files_can_be_added_and_closed() {
    let ctx = EngineContext::new(1, 4, &[]);
    let dir = TempDir::new().unwrap();
    let extra = LogicalFilePartition::new().with_file(9, dir.path().join("extra.dat"));
    assert_ok!(ctx.engine.open_file(&extra));
    assert_err!(ctx.engine.open_file(&extra), AioError::FileAlreadyOpen(9));

    let buf = filled_page(3);
    assert_ok!(ctx.engine.access_all(&[page_req(&buf, 9, 0, AccessMethod::Write, 0)]));
    assert_ok!(ctx.engine.close_file(9));
    assert_eq!(ctx.engine.num_pending_ios(), 0);
    assert_err!(
        ctx.engine.access(&[page_req(&buf, 9, 0, AccessMethod::Write, 0)]),
        AioError::FileNotFound(9)
    );
}

#[test]
fn cleanup_drains_and_closes() {
    let ctx = EngineContext::new(1, 8, &[]);
    let bufs: Vec<_> = (0..8).map(|i| filled_page(i as u8)).collect();
    let reqs: Vec<_> = bufs
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 0))
        .collect();
    assert_eq!(assert_ok!(ctx.engine.access(&reqs)), 8);

    assert_ok!(ctx.engine.cleanup());
    assert_eq!(ctx.engine.num_pending_ios(), 0);
    assert_eq!(ctx.completed.load(Ordering::SeqCst), 8);
    assert_err!(ctx.engine.access(&reqs), AioError::Shutdown);
}

#[test]
fn engines_have_distinct_owners() {
    let dir = TempDir::new().unwrap();
    let config = AioConfig::default().with_backend(AioBackend::Emulated { workers: 1 });
    let a = LogicalFilePartition::new().with_file(0, dir.path().join("a"));
    let b = LogicalFilePartition::new().with_file(0, dir.path().join("b"));
    let ea = AsyncIoEngine::new(&a, &Default::default(), config.clone(), 0).unwrap();
    let eb = AsyncIoEngine::new(&b, &Default::default(), config, 0).unwrap();
    assert_ne!(ea.owner(), eb.owner());
    assert_ne!(ea.owner(), IoOwner::NONE);
}
