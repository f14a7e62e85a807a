//! # Engine Metrics
//!
//! Counters kept by `AsyncIoEngine` while it issues and reaps requests:
//!
//! - **Submission**: requests offered, accepted by the kernel, refused (`EAGAIN` or partial).
//! - **Completion**: completed, failed and short operations, bytes read and written.
//! - **Routing**: completions handled on the reaping node versus sent to another node.
//! - **Latency**: total, minimum and maximum time from submission to reap, plus a
//!   rolling window of recent samples.
//!
//! Counters use relaxed atomics; a `stats()` snapshot is not a consistent cut.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const DEFAULT_RECENT_SAMPLES: usize = 1000;

#[derive(Debug)]
pub struct EngineMetrics {
    // Submission
    submitted: AtomicU64,
    accepted: AtomicU64,
    refused: AtomicU64,
    submit_retries: AtomicU64,

    // Completion
    completed: AtomicU64,
    failed: AtomicU64,
    short: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,

    // Routing
    routed_local: AtomicU64,
    routed_remote: AtomicU64,
    run_inline: AtomicU64,

    // Latency (microseconds)
    total_latency_micros: AtomicU64,
    min_latency_micros: AtomicU64,
    max_latency_micros: AtomicU64,
    recent_latencies: Mutex<VecDeque<Duration>>,
    max_recent_samples: usize,

    start_time: Instant,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub submitted: u64,
    pub accepted: u64,
    pub refused: u64,
    pub submit_retries: u64,
    pub completed: u64,
    pub failed: u64,
    pub short: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub routed_local: u64,
    pub routed_remote: u64,
    pub run_inline: u64,
    pub avg_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_SAMPLES)
    }
}

impl EngineMetrics {
    pub fn new(max_recent_samples: usize) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            submit_retries: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            short: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            routed_local: AtomicU64::new(0),
            routed_remote: AtomicU64::new(0),
            run_inline: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
            min_latency_micros: AtomicU64::new(u64::MAX),
            max_latency_micros: AtomicU64::new(0),
            recent_latencies: Mutex::new(VecDeque::with_capacity(max_recent_samples)),
            max_recent_samples,
            start_time: Instant::now(),
        }
    }

    /// Records one `submit` call: `offered` control blocks, `accepted` taken.
    pub fn record_submit(&self, offered: usize, accepted: usize) {
        self.submitted.fetch_add(offered as u64, Ordering::Relaxed);
        self.accepted.fetch_add(accepted as u64, Ordering::Relaxed);
        self.refused
            .fetch_add(offered.saturating_sub(accepted) as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.submit_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_complete(&self, latency: Option<Duration>, bytes: usize, is_read: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if is_read {
            self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        } else {
            self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        }
        if let Some(latency) = latency {
            self.record_latency(latency);
        }
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A completion that moved fewer bytes than the request covers.
    pub fn record_short(&self) {
        self.short.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local(&self) {
        self.routed_local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote(&self) {
        self.routed_remote.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inline(&self) {
        self.run_inline.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        self.total_latency_micros.fetch_add(micros, Ordering::Relaxed);

        let mut current_min = self.min_latency_micros.load(Ordering::Relaxed);
        while current_min > micros {
            match self.min_latency_micros.compare_exchange_weak(
                current_min,
                micros,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new_min) => current_min = new_min,
            }
        }

        let mut current_max = self.max_latency_micros.load(Ordering::Relaxed);
        while current_max < micros {
            match self.max_latency_micros.compare_exchange_weak(
                current_max,
                micros,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new_max) => current_max = new_max,
            }
        }

        let mut recent = self.recent_latencies.lock();
        recent.push_back(latency);
        while recent.len() > self.max_recent_samples {
            recent.pop_front();
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn average_latency(&self) -> Duration {
        let n = self.completed.load(Ordering::Relaxed);
        if n == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_latency_micros.load(Ordering::Relaxed) / n)
    }

    pub fn min_latency(&self) -> Duration {
        match self.min_latency_micros.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            micros => Duration::from_micros(micros),
        }
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.max_latency_micros.load(Ordering::Relaxed))
    }

    /// Average over the recent window.
    pub fn rolling_average_latency(&self) -> Duration {
        let recent = self.recent_latencies.lock();
        if recent.is_empty() {
            return Duration::ZERO;
        }
        recent.iter().sum::<Duration>() / recent.len() as u32
    }

    pub fn operations_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.completed.load(Ordering::Relaxed) as f64 / elapsed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            submit_retries: self.submit_retries.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            short: self.short.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            routed_local: self.routed_local.load(Ordering::Relaxed),
            routed_remote: self.routed_remote.load(Ordering::Relaxed),
            run_inline: self.run_inline.load(Ordering::Relaxed),
            avg_latency: self.average_latency(),
            min_latency: self.min_latency(),
            max_latency: self.max_latency(),
        }
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted {} (accepted {}, refused {}, retries {}), completed {} (failed {}, short {}), \
             read {} B, written {} B, routed local/remote/inline {}/{}/{}, latency avg {:?} min {:?} max {:?}",
            self.submitted,
            self.accepted,
            self.refused,
            self.submit_retries,
            self.completed,
            self.failed,
            self.short,
            self.bytes_read,
            self.bytes_written,
            self.routed_local,
            self.routed_remote,
            self.run_inline,
            self.avg_latency,
            self.min_latency,
            self.max_latency
        )
    }
}
