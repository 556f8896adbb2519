//! Blocking node API. Every call dispatches to the engine and waits on a fresh completion cell.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bridge::{call_wait, WaitPolicy};
use crate::callback::on_complete;
use crate::completion::{Completion, ProgressFn};
use crate::config::NodeConfig;
use crate::engine::{Dispatch, Engine, NodeHandle};
use crate::error::{Error, Result};
use crate::transfer::Transfer;

/// A storage node owned by the caller from `new` until `destroy`.
///
/// After `destroy` the node no longer holds an engine handle and every operation fails with
/// [`Error::InvalidArgument`] before anything is dispatched. A node dropped without `destroy`
/// is destroyed on drop.
pub struct StorageNode {
    engine: Arc<dyn Engine>,
    handle: Option<NodeHandle>,
    policy: WaitPolicy,
}

impl fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageNode")
            .field("handle", &self.handle)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StorageNode {
    /// Create a node with the default wait policy.
    pub fn new(engine: Arc<dyn Engine>, config: &NodeConfig) -> Result<Self> {
        Self::with_policy(engine, config, WaitPolicy::default())
    }

    pub fn with_policy(
        engine: Arc<dyn Engine>,
        config: &NodeConfig,
        policy: WaitPolicy,
    ) -> Result<Self> {
        let cell = Completion::new();
        let handle = engine.create(config, on_complete(&cell));
        let dispatch = match handle {
            Some(_) => Dispatch::Accepted,
            None => Dispatch::Rejected,
        };
        if let Err(e) = call_wait("create", dispatch, cell, false, policy) {
            if handle.is_some() {
                warn!(error = %e, "node creation failed; engine keeps the half-built node");
            }
            return Err(e);
        }
        let handle = handle.ok_or(Error::Rejected { op: "create" })?;
        debug!(handle = handle.as_raw(), "node created");
        Ok(Self {
            engine,
            handle: Some(handle),
            policy,
        })
    }

    /// Engine handle, None once destroyed.
    pub fn handle(&self) -> Option<NodeHandle> {
        self.handle
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    fn live(&self) -> Result<NodeHandle> {
        self.handle.ok_or(Error::InvalidArgument("node"))
    }

    pub fn start(&self) -> Result<()> {
        let node = self.live()?;
        let cell = Completion::new();
        let dispatch = self.engine.start(node, on_complete(&cell));
        call_wait("start", dispatch, cell, false, self.policy)?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let node = self.live()?;
        let cell = Completion::new();
        let dispatch = self.engine.stop(node, on_complete(&cell));
        call_wait("stop", dispatch, cell, false, self.policy)?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let node = self.live()?;
        let cell = Completion::new();
        let dispatch = self.engine.close(node, on_complete(&cell));
        call_wait("close", dispatch, cell, false, self.policy)?;
        Ok(())
    }

    /// Close (failure tolerated), then destroy. The handle is released even if destroy fails.
    pub fn destroy(&mut self) -> Result<()> {
        let node = self.live()?;
        if let Err(e) = self.close() {
            debug!(error = %e, "close before destroy failed");
        }
        self.handle = None;
        let cell = Completion::new();
        let dispatch = self.engine.destroy(node, on_complete(&cell));
        call_wait("destroy", dispatch, cell, false, self.policy)?;
        debug!(handle = node.as_raw(), "node destroyed");
        Ok(())
    }

    /// Signed peer record other nodes can bootstrap from.
    pub fn spr(&self) -> Result<String> {
        let node = self.live()?;
        let cell = Completion::new();
        let dispatch = self.engine.spr(node, on_complete(&cell));
        call_wait("spr", dispatch, cell, true, self.policy)?.ok_or(Error::EmptyReply { op: "spr" })
    }

    /// Upload a file and return its content id.
    pub fn upload(&self, path: impl AsRef<Path>, progress: Option<ProgressFn>) -> Result<String> {
        let node = self.live()?;
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("path"));
        }
        self.transfer(node).upload(path, progress)
    }

    /// Download `cid` into the file at `dest`.
    pub fn download(
        &self,
        cid: &str,
        dest: impl AsRef<Path>,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        let node = self.live()?;
        let dest = dest.as_ref();
        if cid.is_empty() {
            return Err(Error::InvalidArgument("cid"));
        }
        if dest.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("path"));
        }
        self.transfer(node).download(cid, dest, progress)
    }

    pub fn delete(&self, cid: &str) -> Result<()> {
        let node = self.live()?;
        if cid.is_empty() {
            return Err(Error::InvalidArgument("cid"));
        }
        let cell = Completion::new();
        let dispatch = self.engine.delete(node, cid, on_complete(&cell));
        call_wait("delete", dispatch, cell, false, self.policy)?;
        Ok(())
    }

    fn transfer(&self, node: NodeHandle) -> Transfer<'_> {
        Transfer {
            engine: self.engine.as_ref(),
            node,
            policy: self.policy,
        }
    }
}

impl Drop for StorageNode {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.destroy() {
                warn!(error = %e, "destroy on drop failed");
            }
        }
    }
}
