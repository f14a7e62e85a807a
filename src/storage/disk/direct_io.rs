//! Direct I/O file opening and aligned memory for kernel asynchronous I/O.
//!
//! Kernel AIO only runs truly asynchronously on files opened with `O_DIRECT`,
//! which in turn requires buffers, offsets and lengths aligned to the logical
//! block size. `AlignedBuffer` provides page-aligned heap memory for request
//! payloads and cache pages.

use std::alloc::{self, Layout};
use std::fs::{File, OpenOptions};
use std::io::Result as IoResult;
use std::path::Path;
use std::ptr::NonNull;

use log::{debug, warn};

use crate::common::config::PAGE_SIZE;

/// Configuration for direct I/O operations
#[derive(Debug, Clone)]
pub struct DirectIoConfig {
    pub enabled: bool,
    pub alignment: usize, // Buffer alignment requirement (typically 512 bytes)
}

impl Default for DirectIoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alignment: 512,
        }
    }
}

/// Opens a partition file for reading and writing, bypassing the page cache when enabled.
///
/// Filesystems that refuse `O_DIRECT` (tmpfs, for one) fall back to buffered I/O.
pub fn open_direct_io<P: AsRef<Path>>(
    path: P,
    create: bool,
    config: &DirectIoConfig,
) -> IoResult<File> {
    let path = path.as_ref();
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(create);

    if !config.enabled {
        debug!("Opening file with buffered I/O: {}", path.display());
        return options.open(path);
    }

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;

        let mut direct = options.clone();
        direct.custom_flags(libc::O_DIRECT);
        match direct.open(path) {
            Ok(file) => {
                debug!("Opened file with direct I/O: {}", path.display());
                Ok(file)
            }
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                warn!(
                    "Direct I/O not supported for {}, falling back to buffered I/O",
                    path.display()
                );
                options.open(path)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        warn!("Direct I/O not supported on this platform, falling back to buffered I/O");
        options.open(path)
    }
}

/// Check if a buffer is properly aligned for direct I/O
pub fn is_aligned(buffer: &[u8], alignment: usize) -> bool {
    buffer.as_ptr() as usize % alignment == 0
}

/// Zero-initialized heap memory with a fixed alignment.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer owns its memory exclusively; the raw pointer is only an address.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `size` zeroed bytes aligned to `alignment` (a power of two).
    pub fn new(size: usize, alignment: usize) -> Self {
        let layout = Layout::from_size_align(size.max(1), alignment)
            .unwrap_or_else(|e| panic!("invalid aligned buffer layout: {e}"));
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        debug!(
            "Created aligned buffer: size={}, alignment={}, ptr={:p}",
            size, alignment, raw
        );
        Self { ptr, layout }
    }

    /// Allocates `size` zeroed bytes aligned to a page.
    pub fn page_aligned(size: usize) -> Self {
        Self::new(size, PAGE_SIZE)
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Raw pointer for handing the memory to the kernel.
    ///
    /// Writes through it must not race with `as_slice` borrows.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
