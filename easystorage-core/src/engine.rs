//! Engine boundary: the asynchronous primitives a storage engine exposes.
//! Every primitive returns immediately; the outcome arrives later through the continuation,
//! on a thread owned by the engine.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;

use crate::config::NodeConfig;

/// Result code carried by engine notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetCode(pub i32);

impl RetCode {
    pub const OK: RetCode = RetCode(0);
    pub const ERR: RetCode = RetCode(1);
    pub const MISSING_CALLBACK: RetCode = RetCode(2);
    /// Intermediate notice; never terminal.
    pub const PROGRESS: RetCode = RetCode(3);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OK => f.write_str("ok"),
            Self::ERR => f.write_str("error"),
            Self::MISSING_CALLBACK => f.write_str("missing callback"),
            Self::PROGRESS => f.write_str("progress"),
            RetCode(other) => write!(f, "code {}", other),
        }
    }
}

/// Immediate answer of a dispatch primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The engine took the request and will invoke the continuation.
    Accepted,
    /// The continuation was dropped unused; no notice will ever arrive.
    Rejected,
}

impl Dispatch {
    pub fn is_accepted(self) -> bool {
        matches!(self, Dispatch::Accepted)
    }
}

/// Opaque reference to an engine-side node. Never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(NonZeroUsize);

impl NodeHandle {
    /// Wrap a raw engine handle. Returns None for 0 (null).
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(NodeHandle)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Continuation handed to the engine with every dispatch.
///
/// Called with `(code, message)` zero or more times with [`RetCode::PROGRESS`], then exactly once
/// with a terminal code. The engine drops it after the terminal call, or at dispatch time when it
/// rejects the request.
pub type Callback = Box<dyn FnMut(RetCode, &[u8]) + Send + 'static>;

/// Asynchronous storage engine.
///
/// Implementations must not run the continuation of one operation concurrently with itself.
pub trait Engine: Send + Sync {
    /// Create a node. The handle is returned immediately; the continuation reports whether the node
    /// came up. None means the request was rejected.
    fn create(&self, config: &NodeConfig, on_done: Callback) -> Option<NodeHandle>;

    fn start(&self, node: NodeHandle, on_done: Callback) -> Dispatch;

    fn stop(&self, node: NodeHandle, on_done: Callback) -> Dispatch;

    fn close(&self, node: NodeHandle, on_done: Callback) -> Dispatch;

    fn destroy(&self, node: NodeHandle, on_done: Callback) -> Dispatch;

    /// Terminal payload: the node's signed peer record.
    fn spr(&self, node: NodeHandle, on_done: Callback) -> Dispatch;

    /// Terminal payload: upload session id.
    fn upload_init(
        &self,
        node: NodeHandle,
        path: &Path,
        chunk_size: usize,
        on_done: Callback,
    ) -> Dispatch;

    /// Progress notices, then terminal payload: content id.
    fn upload_file(&self, node: NodeHandle, session_id: &str, on_event: Callback) -> Dispatch;

    fn download_init(
        &self,
        node: NodeHandle,
        cid: &str,
        chunk_size: usize,
        local: bool,
        on_done: Callback,
    ) -> Dispatch;

    /// Writes the content to `dest`; reports progress notices, then a terminal code.
    fn download_stream(
        &self,
        node: NodeHandle,
        cid: &str,
        chunk_size: usize,
        local: bool,
        dest: &Path,
        on_event: Callback,
    ) -> Dispatch;

    fn delete(&self, node: NodeHandle, cid: &str, on_done: Callback) -> Dispatch;
}
