//! Completion callbacks and the pooled wrapper that carries a request through
//! the kernel and the completion pipeline.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};

use crate::storage::disk::async_disk::request::{
    AccessMethod, INVALID_DATA_LOC, IoOwner, IoRequest, RequestExtension,
};

/// Outcome of one kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Completed { bytes: usize },
    /// The kernel moved fewer bytes than the request covers, e.g. a read past end of file.
    Short { bytes: usize, expected: usize },
    Failed { errno: i32 },
}

impl IoStatus {
    /// Decodes a kernel result: transferred bytes, or a negated errno.
    pub fn from_result(res: i64) -> Self {
        if res >= 0 {
            IoStatus::Completed { bytes: res as usize }
        } else {
            IoStatus::Failed { errno: (-res) as i32 }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Completed { .. })
    }

    pub fn bytes(&self) -> usize {
        match self {
            IoStatus::Completed { bytes } | IoStatus::Short { bytes, .. } => *bytes,
            IoStatus::Failed { .. } => 0,
        }
    }
}

impl Default for IoStatus {
    fn default() -> Self {
        IoStatus::Completed { bytes: 0 }
    }
}

/// Notified once per completed request, on the completion thread of the request's node.
pub trait IoCallback: Send + Sync {
    fn invoke(&self, req: &IoRequest, status: IoStatus);
}

impl<F> IoCallback for F
where
    F: Fn(&IoRequest, IoStatus) + Send + Sync,
{
    fn invoke(&self, req: &IoRequest, status: IoStatus) {
        self(req, status)
    }
}

/// The engine side of a completed wrapper.
pub trait CompletionOwner: Send + Sync {
    /// Takes back a wrapper whose callback already ran.
    fn complete(&self, wrapper: Box<CompletionCallbackWrapper>);
}

/// One extended request plus everything needed to finish it.
///
/// Exactly one thread owns a wrapper at a time: the slab, the issuing engine,
/// a completion queue or the completion thread running it.
pub struct CompletionCallbackWrapper {
    req: IoRequest,
    engine: Option<Weak<dyn CompletionOwner>>,
    callback: Option<Arc<dyn IoCallback>>,
    fd: RawFd,
    status: IoStatus,
}

impl CompletionCallbackWrapper {
    pub(crate) fn new() -> Self {
        Self {
            req: IoRequest::new_extended(
                Box::new(RequestExtension::new()),
                INVALID_DATA_LOC,
                AccessMethod::Read,
                IoOwner::NONE,
                0,
            ),
            engine: None,
            callback: None,
            fd: -1,
            status: IoStatus::default(),
        }
    }

    pub fn req(&self) -> &IoRequest {
        &self.req
    }

    pub fn req_mut(&mut self) -> &mut IoRequest {
        &mut self.req
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn status(&self) -> IoStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: IoStatus) {
        self.status = status;
    }

    /// Attaches the wrapper to the engine issuing it.
    pub(crate) fn bind(
        &mut self,
        engine: Weak<dyn CompletionOwner>,
        callback: Option<Arc<dyn IoCallback>>,
        fd: RawFd,
    ) {
        self.engine = Some(engine);
        self.callback = callback;
        self.fd = fd;
    }

    /// Drops the engine binding before the wrapper goes back to the pool.
    pub(crate) fn clear(&mut self) {
        self.engine = None;
        self.callback = None;
        self.fd = -1;
        self.status = IoStatus::default();
    }

    /// Invokes the callback and hands the wrapper back to its engine.
    pub fn run(mut self: Box<Self>) {
        if let Some(callback) = self.callback.take() {
            callback.invoke(&self.req, self.status);
        }
        // An engine that is gone has no pool to return to.
        if let Some(engine) = self.engine.take().and_then(|e| e.upgrade()) {
            engine.complete(self);
        }
    }
}

impl fmt::Debug for CompletionCallbackWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCallbackWrapper")
            .field("req", &self.req)
            .field("fd", &self.fd)
            .field("status", &self.status)
            .field("bound", &self.engine.is_some())
            .finish()
    }
}
