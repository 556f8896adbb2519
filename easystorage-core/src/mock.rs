//! Scriptable engine double for tests. By default answers like a healthy node: every dispatch is
//! accepted and the continuation runs synchronously, streaming operations emit one progress
//! notice before their terminal one.

use std::collections::HashSet;
use std::path::Path;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::NodeConfig;
use crate::engine::{Callback, Dispatch, Engine, NodeHandle, RetCode};

pub const MOCK_SESSION: &str = "mock-session-123";
pub const MOCK_CID: &str = "zDvZRwzmAbCdEfGhIjKlMnOpQrStUvWxYz0123456789ABCD";
pub const MOCK_SPR: &str = "spr:CiUIAhIhAmockmockmock";

#[derive(Default)]
struct Script {
    reject: HashSet<&'static str>,
    fail: HashSet<&'static str>,
    silent: HashSet<&'static str>,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockEngine {
    script: Mutex<Script>,
    calls: Mutex<Vec<&'static str>>,
    configs: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse dispatches of `op`.
    pub fn reject(self, op: &'static str) -> Self {
        self.script.lock().reject.insert(op);
        self
    }

    /// Accept `op` but resolve it with `RET_ERR`.
    pub fn fail(self, op: &'static str) -> Self {
        self.script.lock().fail.insert(op);
        self
    }

    /// Accept `op` and never answer it.
    pub fn silent(self, op: &'static str) -> Self {
        self.script.lock().silent.insert(op);
        self
    }

    /// Deliver notices from a separate thread after `delay`.
    pub fn delayed(self, delay: Duration) -> Self {
        self.script.lock().delay = Some(delay);
        self
    }

    /// Operations dispatched so far, in order (rejected ones included).
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn configs(&self) -> Vec<String> {
        self.configs.lock().clone()
    }

    fn answer(
        &self,
        op: &'static str,
        mut cb: Callback,
        notices: Vec<(RetCode, &'static str)>,
    ) -> Dispatch {
        self.calls.lock().push(op);
        let script = self.script.lock();
        if script.reject.contains(op) {
            return Dispatch::Rejected;
        }
        if script.silent.contains(op) {
            // Keep the continuation alive forever, as an engine that lost the request would.
            std::mem::forget(cb);
            return Dispatch::Accepted;
        }
        let notices = if script.fail.contains(op) {
            vec![(RetCode::ERR, "mock failure")]
        } else {
            notices
        };
        match script.delay {
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    for (code, msg) in notices {
                        cb(code, msg.as_bytes());
                    }
                });
            }
            None => {
                for (code, msg) in notices {
                    cb(code, msg.as_bytes());
                }
            }
        }
        Dispatch::Accepted
    }
}

impl Engine for MockEngine {
    fn create(&self, config: &NodeConfig, on_done: Callback) -> Option<NodeHandle> {
        self.configs.lock().push(config.to_json().unwrap());
        match self.answer("create", on_done, vec![(RetCode::OK, "ok")]) {
            Dispatch::Accepted => NodeHandle::from_raw(42),
            Dispatch::Rejected => None,
        }
    }

    fn start(&self, _node: NodeHandle, on_done: Callback) -> Dispatch {
        self.answer("start", on_done, vec![(RetCode::OK, "started")])
    }

    fn stop(&self, _node: NodeHandle, on_done: Callback) -> Dispatch {
        self.answer("stop", on_done, vec![(RetCode::OK, "stopped")])
    }

    fn close(&self, _node: NodeHandle, on_done: Callback) -> Dispatch {
        self.answer("close", on_done, vec![(RetCode::OK, "closed")])
    }

    fn destroy(&self, _node: NodeHandle, on_done: Callback) -> Dispatch {
        self.answer("destroy", on_done, vec![(RetCode::OK, "destroyed")])
    }

    fn spr(&self, _node: NodeHandle, on_done: Callback) -> Dispatch {
        self.answer("spr", on_done, vec![(RetCode::OK, MOCK_SPR)])
    }

    fn upload_init(
        &self,
        _node: NodeHandle,
        _path: &Path,
        _chunk_size: usize,
        on_done: Callback,
    ) -> Dispatch {
        self.answer(
            "upload_init",
            on_done,
            vec![(RetCode::OK, MOCK_SESSION)],
        )
    }

    fn upload_file(&self, _node: NodeHandle, _session_id: &str, on_event: Callback) -> Dispatch {
        self.answer(
            "upload_file",
            on_event,
            vec![
                (RetCode::PROGRESS, "chunk"),
                (RetCode::OK, MOCK_CID),
            ],
        )
    }

    fn download_init(
        &self,
        _node: NodeHandle,
        _cid: &str,
        _chunk_size: usize,
        _local: bool,
        on_done: Callback,
    ) -> Dispatch {
        self.answer("download_init", on_done, vec![(RetCode::OK, "init")])
    }

    fn download_stream(
        &self,
        _node: NodeHandle,
        _cid: &str,
        _chunk_size: usize,
        _local: bool,
        _dest: &Path,
        on_event: Callback,
    ) -> Dispatch {
        self.answer(
            "download_stream",
            on_event,
            vec![(RetCode::PROGRESS, "data"), (RetCode::OK, "done")],
        )
    }

    fn delete(&self, _node: NodeHandle, _cid: &str, on_done: Callback) -> Dispatch {
        self.answer("delete", on_done, vec![(RetCode::OK, "")])
    }
}
