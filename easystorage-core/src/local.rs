//! In-process engine on a tokio runtime. Stores uploaded content as files under
//! `<data-dir>/blocks`, keyed by the hex SHA-256 of the content. Continuations run on the
//! runtime's worker threads, like the native engine's callbacks.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::{NodeConfig, DEFAULT_DATA_DIR};
use crate::engine::{Callback, Dispatch, Engine, NodeHandle, RetCode};
use crate::transfer::DEFAULT_CHUNK_SIZE;

const BLOCKS_DIR: &str = "blocks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Created,
    Running,
    Stopped,
    Closed,
}

struct UploadSession {
    path: PathBuf,
    chunk_size: usize,
}

struct LocalNode {
    config: NodeConfig,
    blocks: PathBuf,
    state: Mutex<NodeState>,
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl LocalNode {
    fn require_running(&self) -> io::Result<()> {
        match *self.state.lock() {
            NodeState::Running => Ok(()),
            _ => Err(not_running()),
        }
    }

    fn block_path(&self, cid: &str) -> io::Result<PathBuf> {
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("malformed content id: {}", cid),
            ));
        }
        Ok(self.blocks.join(cid))
    }
}

pub struct LocalEngine {
    runtime: Runtime,
    nodes: Mutex<HashMap<NodeHandle, Arc<LocalNode>>>,
    next_id: AtomicUsize,
}

impl LocalEngine {
    pub fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("local-engine")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
        })
    }

    fn node(&self, handle: NodeHandle) -> Option<Arc<LocalNode>> {
        self.nodes.lock().get(&handle).cloned()
    }

    /// Run `op` on the runtime and report its result as one terminal notice.
    fn complete<F>(&self, mut on_done: Callback, op: F) -> Dispatch
    where
        F: Future<Output = io::Result<String>> + Send + 'static,
    {
        self.runtime.spawn(async move {
            match op.await {
                Ok(msg) => on_done(RetCode::OK, msg.as_bytes()),
                Err(e) => on_done(RetCode::ERR, e.to_string().as_bytes()),
            }
        });
        Dispatch::Accepted
    }

    /// Look up `handle` and run a state transition; unknown handles are rejected outright.
    fn transition(
        &self,
        handle: NodeHandle,
        on_done: Callback,
        step: fn(&mut NodeState) -> io::Result<&'static str>,
    ) -> Dispatch {
        let Some(node) = self.node(handle) else {
            return Dispatch::Rejected;
        };
        self.complete(on_done, async move {
            let mut state = node.state.lock();
            step(&mut state).map(str::to_string)
        })
    }
}

fn not_running() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "node is not running")
}

impl Engine for LocalEngine {
    fn create(&self, config: &NodeConfig, on_done: Callback) -> Option<NodeHandle> {
        let handle = NodeHandle::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))?;
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let node = Arc::new(LocalNode {
            config: config.clone(),
            blocks: data_dir.join(BLOCKS_DIR),
            state: Mutex::new(NodeState::Created),
            sessions: Mutex::new(HashMap::new()),
        });
        self.nodes.lock().insert(handle, node.clone());
        debug!(handle = handle.as_raw(), data_dir = %data_dir.display(), "local node registered");
        self.complete(on_done, async move {
            tokio::fs::create_dir_all(&node.blocks).await?;
            Ok("ok".to_string())
        });
        Some(handle)
    }

    fn start(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        self.transition(node, on_done, |state| match *state {
            NodeState::Closed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "node is closed",
            )),
            _ => {
                *state = NodeState::Running;
                Ok("started")
            }
        })
    }

    fn stop(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        self.transition(node, on_done, |state| match *state {
            NodeState::Running => {
                *state = NodeState::Stopped;
                Ok("stopped")
            }
            _ => Err(not_running()),
        })
    }

    fn close(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        self.transition(node, on_done, |state| match *state {
            NodeState::Closed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "node already closed",
            )),
            _ => {
                *state = NodeState::Closed;
                Ok("closed")
            }
        })
    }

    fn destroy(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        if self.nodes.lock().remove(&node).is_none() {
            return Dispatch::Rejected;
        }
        self.complete(on_done, async { Ok("destroyed".to_string()) })
    }

    fn spr(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        self.complete(on_done, async move {
            let c = &node.config;
            let mut hasher = Sha256::new();
            hasher.update(format!("{}:{}:", c.api_port, c.disc_port));
            hasher.update(node.blocks.to_string_lossy().as_bytes());
            Ok(format!("spr:{}", hex(&hasher.finalize())))
        })
    }

    fn upload_init(
        &self,
        node: NodeHandle,
        path: &Path,
        chunk_size: usize,
        on_done: Callback,
    ) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        let path = path.to_path_buf();
        self.complete(on_done, async move {
            node.require_running()?;
            let meta = tokio::fs::metadata(&path).await?;
            if !meta.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a regular file: {}", path.display()),
                ));
            }
            let session = uuid::Uuid::new_v4().to_string();
            node.sessions
                .lock()
                .insert(session.clone(), UploadSession { path, chunk_size });
            Ok(session)
        })
    }

    fn upload_file(&self, node: NodeHandle, session_id: &str, on_event: Callback) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        let session_id = session_id.to_string();
        self.runtime.spawn(async move {
            let mut on_event = on_event;
            let result = store_upload(&node, &session_id, &mut on_event).await;
            finish(on_event, result);
        });
        Dispatch::Accepted
    }

    fn download_init(
        &self,
        node: NodeHandle,
        cid: &str,
        _chunk_size: usize,
        _local: bool,
        on_done: Callback,
    ) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        let cid = cid.to_string();
        // Nothing to fetch from peers: content is either in the local store or missing.
        self.complete(on_done, async move {
            node.require_running()?;
            let block = node.block_path(&cid)?;
            if !tokio::fs::try_exists(&block).await? {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("content not found: {}", cid),
                ));
            }
            Ok(String::new())
        })
    }

    fn download_stream(
        &self,
        node: NodeHandle,
        cid: &str,
        chunk_size: usize,
        _local: bool,
        dest: &Path,
        on_event: Callback,
    ) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        let cid = cid.to_string();
        let dest = dest.to_path_buf();
        self.runtime.spawn(async move {
            let mut on_event = on_event;
            let result = copy_block(&node, &cid, chunk_size, &dest, &mut on_event).await;
            finish(on_event, result.map(|()| String::new()));
        });
        Dispatch::Accepted
    }

    fn delete(&self, node: NodeHandle, cid: &str, on_done: Callback) -> Dispatch {
        let Some(node) = self.node(node) else {
            return Dispatch::Rejected;
        };
        let cid = cid.to_string();
        self.complete(on_done, async move {
            let block = node.block_path(&cid)?;
            tokio::fs::remove_file(&block).await?;
            Ok(String::new())
        })
    }
}

fn finish(mut on_event: Callback, result: io::Result<String>) {
    match result {
        Ok(msg) => on_event(RetCode::OK, msg.as_bytes()),
        Err(e) => on_event(RetCode::ERR, e.to_string().as_bytes()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn effective_chunk(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// Stream the session's file into the block store, one progress notice per read.
/// Returns the content id.
async fn store_upload(
    node: &LocalNode,
    session_id: &str,
    on_event: &mut Callback,
) -> io::Result<String> {
    node.require_running()?;
    let session = node.sessions.lock().remove(session_id).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("unknown upload session: {}", session_id),
        )
    })?;

    let mut src = tokio::fs::File::open(&session.path).await?;
    let partial = node.blocks.join(format!(".{}.part", session_id));
    let stored = async {
        let cid = write_partial(&mut src, &partial, session.chunk_size, on_event).await?;
        tokio::fs::rename(&partial, node.blocks.join(&cid)).await?;
        Ok::<_, io::Error>(cid)
    }
    .await;
    match stored {
        Ok(cid) => {
            debug!(%cid, path = %session.path.display(), "local upload stored");
            Ok(cid)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                if rm.kind() != io::ErrorKind::NotFound {
                    debug!(path = %partial.display(), error = %rm, "partial upload left behind");
                }
            }
            Err(e)
        }
    }
}

/// Copy `src` into a new file at `partial`, hashing as it goes. Returns the content id.
async fn write_partial(
    src: &mut tokio::fs::File,
    partial: &Path,
    chunk_size: usize,
    on_event: &mut Callback,
) -> io::Result<String> {
    let mut out = tokio::fs::File::create(partial).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; effective_chunk(chunk_size)];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n]).await?;
        on_event(RetCode::PROGRESS, &buf[..n]);
    }
    out.flush().await?;
    Ok(hex(&hasher.finalize()))
}

async fn copy_block(
    node: &LocalNode,
    cid: &str,
    chunk_size: usize,
    dest: &Path,
    on_event: &mut Callback,
) -> io::Result<()> {
    node.require_running()?;
    let block = node.block_path(cid)?;
    let mut src = tokio::fs::File::open(&block).await?;
    let mut out = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; effective_chunk(chunk_size)];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        on_event(RetCode::PROGRESS, &buf[..n]);
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WaitPolicy;
    use crate::completion::Progress;
    use crate::error::Error;
    use crate::node::StorageNode;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn engine() -> Arc<LocalEngine> {
        Arc::new(LocalEngine::new().unwrap())
    }

    fn config(dir: &Path) -> NodeConfig {
        NodeConfig {
            data_dir: Some(dir.join("data")),
            ..NodeConfig::default()
        }
    }

    fn policy() -> WaitPolicy {
        WaitPolicy::new(Duration::from_secs(10))
    }

    #[test]
    fn upload_then_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &payload).unwrap();

        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.start().unwrap();

        let uploaded = Arc::new(AtomicU64::new(0));
        let seen = uploaded.clone();
        let cid = node
            .upload(
                &src,
                Some(Box::new(move |p: Progress| {
                    seen.store(p.completed, Ordering::SeqCst)
                })),
            )
            .unwrap();
        assert_eq!(cid.len(), 64);
        assert_eq!(uploaded.load(Ordering::SeqCst), payload.len() as u64);
        assert!(dir.path().join("data/blocks").join(&cid).exists());

        let out = dir.path().join("out.bin");
        node.download(&cid, &out, None).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), payload);
    }

    #[test]
    fn same_content_same_cid() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, b"hello").unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.start().unwrap();
        assert_eq!(node.upload(&a, None).unwrap(), node.upload(&b, None).unwrap());
    }

    #[test]
    fn operations_need_a_running_node() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        assert!(matches!(
            node.upload(&src, None),
            Err(Error::Failed {
                op: "upload_init",
                ..
            })
        ));
        assert!(node.stop().is_err());
    }

    #[test]
    fn missing_file_and_missing_content_fail() {
        let dir = tempfile::tempdir().unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.start().unwrap();
        assert!(node.upload(dir.path().join("nope.txt"), None).is_err());
        assert!(matches!(
            node.download("deadbeef", dir.path().join("out"), None),
            Err(Error::Failed {
                op: "download_init",
                ..
            })
        ));
        assert!(node.delete("deadbeef").is_err());
        assert!(node.download("../escape", dir.path().join("out"), None).is_err());
    }

    #[test]
    fn delete_removes_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"bye").unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.start().unwrap();
        let cid = node.upload(&src, None).unwrap();
        node.delete(&cid).unwrap();
        assert!(node.download(&cid, dir.path().join("out"), None).is_err());
    }

    #[test]
    fn spr_is_stable_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        let spr = node.spr().unwrap();
        assert!(spr.starts_with("spr:"));
        assert_eq!(node.spr().unwrap(), spr);
    }

    #[test]
    fn destroyed_handle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let mut node =
            StorageNode::with_policy(engine.clone(), &config(dir.path()), policy()).unwrap();
        let handle = node.handle().unwrap();
        node.start().unwrap();
        node.stop().unwrap();
        node.destroy().unwrap();

        let cell = crate::completion::Completion::new();
        let dispatch = engine.start(handle, crate::callback::on_complete(&cell));
        assert_eq!(dispatch, Dispatch::Rejected);
    }

    #[test]
    fn double_close_fails_but_destroy_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.close().unwrap();
        assert!(node.close().is_err());
        node.destroy().unwrap();
    }

    #[test]
    fn failed_upload_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("collide.txt");
        std::fs::write(&src, b"collide").unwrap();
        let node = StorageNode::with_policy(engine(), &config(dir.path()), policy()).unwrap();
        node.start().unwrap();

        // A non-empty directory where the block should land makes the final rename fail.
        let blocks = dir.path().join("data/blocks");
        let squatter = blocks.join(hex(&Sha256::digest(b"collide")));
        std::fs::create_dir_all(&squatter).unwrap();
        std::fs::write(squatter.join("keep"), b"x").unwrap();

        assert!(node.upload(&src, None).is_err());
        let leftovers: Vec<_> = std::fs::read_dir(&blocks)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "partial files left: {:?}", leftovers);
    }
}
