//! Streaming operations: upload and download as two bridged phases each.
//!
//! Upload: `upload_init(path)` yields a session id, `upload_file(session)` streams the file with
//! progress and yields the content id. Download: `download_init(cid)` then
//! `download_stream(cid, dest)` with progress. Each phase gets its own completion cell and the
//! first failing phase aborts the operation; nothing is retried.

use std::path::Path;

use tracing::{debug, info};

use crate::bridge::{call_wait, WaitPolicy};
use crate::callback::{on_complete, on_progress};
use crate::completion::{Completion, ProgressFn};
use crate::engine::{Engine, NodeHandle};
use crate::error::{Error, Result};

/// Chunk size requested from the engine for both directions.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub(crate) struct Transfer<'a> {
    pub engine: &'a dyn Engine,
    pub node: NodeHandle,
    pub policy: WaitPolicy,
}

impl Transfer<'_> {
    /// Upload the file at `path`; returns its content id.
    pub fn upload(&self, path: &Path, progress: Option<ProgressFn>) -> Result<String> {
        let cell = Completion::new();
        let dispatch =
            self.engine
                .upload_init(self.node, path, DEFAULT_CHUNK_SIZE, on_complete(&cell));
        let session = call_wait("upload_init", dispatch, cell, true, self.policy)?
            .ok_or(Error::EmptyReply { op: "upload_init" })?;
        debug!(%session, path = %path.display(), "upload session open");

        let cell = Completion::with_progress(progress);
        let dispatch = self
            .engine
            .upload_file(self.node, &session, on_progress(&cell));
        let cid = call_wait("upload_file", dispatch, cell, true, self.policy)?
            .ok_or(Error::EmptyReply { op: "upload_file" })?;
        info!(%cid, path = %path.display(), "upload complete");
        Ok(cid)
    }

    /// Fetch `cid` into `dest`. The engine writes the file; only counts come back.
    pub fn download(&self, cid: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<()> {
        let cell = Completion::new();
        let dispatch = self.engine.download_init(
            self.node,
            cid,
            DEFAULT_CHUNK_SIZE,
            false,
            on_complete(&cell),
        );
        call_wait("download_init", dispatch, cell, false, self.policy)?;

        let cell = Completion::with_progress(progress);
        let dispatch = self.engine.download_stream(
            self.node,
            cid,
            DEFAULT_CHUNK_SIZE,
            false,
            dest,
            on_progress(&cell),
        );
        call_wait("download_stream", dispatch, cell, false, self.policy)?;
        info!(%cid, dest = %dest.display(), "download complete");
        Ok(())
    }
}
