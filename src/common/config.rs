use std::time::Duration;

/** Size of a page on disk and in the page cache, in bytes. */
pub const PAGE_SIZE: usize = 4096;

/** Basic write requests at most this large are copied into the wire buffer when serialized. */
pub const MAX_INLINE_SIZE: usize = 128;

/** Number of buffer descriptors a request extension stores without touching the heap. */
pub const NUM_EMBEDDED_IOVECS: usize = 4;

/** Default kernel queue depth of one file in a partition. */
pub const AIO_DEPTH_PER_FILE: usize = 32;

/** Node ids are stored in 8 bits. */
pub const MAX_NODE_ID: usize = (1 << 8) - 1;

/** Buffer sizes are stored in 32 bits (split into two 16-bit halves on the wire). */
pub const MAX_BUF_SIZE: usize = (1 << 32) - 1;

/** Offsets, user data and owner ids are stored in 48 bits. */
pub const ADDR_BITS: u32 = 48;
pub const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

/** Default RAID block size, in pages. */
pub const DEFAULT_RAID_BLOCK_PAGES: usize = 16;

/** Default growth step of the callback slab. */
pub const CALLBACK_SLAB_INCREMENT: usize = 64;

pub const INVALID_FILE_ID: FileId = -1;
pub const INVALID_OFFSET: i64 = -1;

pub type FileId = i32; // file id type
pub type NodeId = usize; // NUMA node id type

/// Rounds `off` down to a multiple of `align`.
#[inline]
pub fn round_down(off: i64, align: i64) -> i64 {
    off - off.rem_euclid(align)
}

/// Rounds `off` down to a page boundary.
#[inline]
pub fn round_page(off: i64) -> i64 {
    round_down(off, PAGE_SIZE as i64)
}

/// Which kernel asynchronous I/O facility the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioBackend {
    /// Linux native AIO (`io_setup`/`io_submit`/`io_getevents`).
    Libaio,
    /// Worker threads issuing `pread`/`pwrite`. Works everywhere.
    Emulated { workers: usize },
}

impl AioBackend {
    /// Libaio on Linux, the emulated backend elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            AioBackend::Libaio
        } else {
            AioBackend::Emulated {
                workers: num_cpus::get().min(8),
            }
        }
    }
}

/// How `access_all` deals with a kernel that accepts fewer requests than it was given.
#[derive(Debug, Clone)]
pub struct SubmitRetryPolicy {
    /// Attempts after a zero-progress submission before reporting the shortfall.
    pub max_attempts: u32,
    /// First backoff delay; doubled after every zero-progress attempt.
    pub initial_backoff: Duration,
    /// Upper bound on a single backoff delay.
    pub max_backoff: Duration,
}

impl Default for SubmitRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_micros(50),
            max_backoff: Duration::from_millis(5),
        }
    }
}

/// Configuration of one asynchronous I/O engine.
#[derive(Debug, Clone)]
pub struct AioConfig {
    // Kernel context
    pub aio_depth_per_file: usize,
    pub backend: AioBackend,
    pub direct_io: bool,

    // Callback slab
    pub slab_increment: usize,
    pub slab_max_size: usize,

    // Request geometry
    pub raid_block_pages: usize,

    // Submission and completion
    pub submit_retry: SubmitRetryPolicy,
    pub completion_batch: usize,
}

impl AioConfig {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.aio_depth_per_file = depth;
        self
    }

    pub fn with_backend(mut self, backend: AioBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_slab_limits(mut self, increment: usize, max_size: usize) -> Self {
        self.slab_increment = increment;
        self.slab_max_size = max_size;
        self
    }

    /// Total kernel queue depth for a partition of `num_files` files.
    pub fn total_depth(&self, num_files: usize) -> usize {
        self.aio_depth_per_file * num_files.max(1)
    }
}

impl Default for AioConfig {
    fn default() -> Self {
        Self {
            aio_depth_per_file: AIO_DEPTH_PER_FILE,
            backend: AioBackend::platform_default(),
            direct_io: false,

            slab_increment: CALLBACK_SLAB_INCREMENT,
            slab_max_size: usize::MAX,

            raid_block_pages: DEFAULT_RAID_BLOCK_PAGES,

            submit_retry: SubmitRetryPolicy::default(),
            completion_batch: AIO_DEPTH_PER_FILE,
        }
    }
}
