use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use flash_aio::common::config::{AioBackend, AioConfig, NodeId};
use flash_aio::common::numa;
use flash_aio::storage::disk::async_disk::io::{AsyncIoEngine, IoStatus, LogicalFilePartition};
use flash_aio::storage::disk::async_disk::request::{AccessMethod, IoRequest};
use parking_lot::Mutex;

use crate::common::fixtures::{EngineContext, filled_page, page_req, wait_until};

/// Records the node each callback ran on, keyed by the request's page.
fn record_nodes(ctx: &EngineContext) -> Arc<Mutex<HashMap<i64, Option<NodeId>>>> {
    let seen = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&seen);
    ctx.engine.set_callback(Arc::new(move |req: &IoRequest, status: IoStatus| {
        assert!(status.is_ok());
        sink.lock().insert(req.offset(), numa::current_node());
    }));
    seen
}

#[test]
fn callbacks_run_on_the_request_node() {
    let ctx = EngineContext::new(1, 16, &[1, 2]);
    let seen = record_nodes(&ctx);

    let bufs: Vec<_> = (0..12).map(|i| filled_page(i as u8)).collect();
    let reqs: Vec<_> = bufs
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 1 + i % 2))
        .collect();
    assert_ok!(ctx.engine.access_all(&reqs));
    ctx.drain();
    ctx.wait_completed(12);

    let seen = seen.lock();
    for (i, req) in reqs.iter().enumerate() {
        assert_eq!(seen[&req.offset()], Some(1 + i % 2), "page {i}");
    }
    assert_eq!(ctx.engine.stats().routed_remote, 12);
    assert_eq!(ctx.engine.num_local_alloc(), 0);
}

#[test]
fn reaper_on_the_request_node_queues_directly() {
    let ctx = EngineContext::new(1, 8, &[3]);
    let seen = record_nodes(&ctx);
    numa::bind_current_thread(3);

    let bufs: Vec<_> = (0..4).map(|i| filled_page(i as u8)).collect();
    let reqs: Vec<_> = bufs
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 3))
        .collect();
    assert_ok!(ctx.engine.access_all(&reqs));
    ctx.drain();
    ctx.wait_completed(4);
    numa::unbind_current_thread();

    assert!(seen.lock().values().all(|n| *n == Some(3)));
    let stats = ctx.engine.stats();
    assert_eq!(stats.routed_local, 4);
    assert_eq!(stats.routed_remote, 0);
    assert_eq!(ctx.engine.num_local_alloc(), 4);
    wait_until(|| ctx.threads[&3].num_completed_reqs() == 4);
}

#[test]
fn nodes_without_a_thread_complete_inline() {
    let ctx = EngineContext::new(1, 8, &[1]);
    let seen = record_nodes(&ctx);

    let buf = filled_page(9);
    assert_ok!(ctx.engine.access_all(&[page_req(&buf, 0, 0, AccessMethod::Write, 5)]));
    ctx.drain();

    // Ran on the reaping thread before wait4complete returned.
    assert_eq!(ctx.engine.num_completed_reqs(), 1);
    assert_eq!(seen.lock()[&0], None);
    assert_eq!(ctx.engine.stats().run_inline, 1);
}

#[test]
fn engines_share_completion_threads() {
    let ctx = EngineContext::new(1, 8, &[1]);
    let dir = tempfile::TempDir::new().unwrap();
    let partition = LogicalFilePartition::new().with_file(0, dir.path().join("other.dat"));
    let config = AioConfig::default()
        .with_depth(8)
        .with_backend(AioBackend::Emulated { workers: 2 });
    let other = Arc::new(AsyncIoEngine::new(&partition, &ctx.threads, config, 0).unwrap());

    let issuer = {
        let other = Arc::clone(&other);
        thread::spawn(move || {
            let bufs: Vec<_> = (0..6).map(|i| filled_page(i as u8)).collect();
            let reqs: Vec<_> = bufs
                .iter()
                .enumerate()
                .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 1))
                .collect();
            other.access_all(&reqs).unwrap();
            while other.num_pending_ios() > 0 {
                other.wait4complete().unwrap();
            }
            other.flush_requests();
        })
    };

    let bufs: Vec<_> = (0..6).map(|i| filled_page(i as u8)).collect();
    let reqs: Vec<_> = bufs
        .iter()
        .enumerate()
        .map(|(i, b)| page_req(b, 0, i, AccessMethod::Write, 1))
        .collect();
    assert_ok!(ctx.engine.access_all(&reqs));
    ctx.drain();
    issuer.join().unwrap();

    ctx.wait_completed(6);
    wait_until(|| other.num_completed_reqs() == 6);
    wait_until(|| ctx.threads[&1].num_completed_reqs() == 12);
}
