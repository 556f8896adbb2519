//! Binding to the native storage library (`libstorage`). Enabled with the `libstorage` feature.
//!
//! The boxed continuation travels through the C API as the `user_data` token. The trampoline
//! frees it after the first non-progress notice; a rejected dispatch frees it immediately,
//! since the library never calls back for requests it refused.

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::sync::Once;

use tracing::warn;

use crate::config::NodeConfig;
use crate::engine::{Callback, Dispatch, Engine, NodeHandle, RetCode};

type StorageCallback =
    unsafe extern "C" fn(ret: c_int, msg: *const c_char, len: usize, user_data: *mut c_void);

#[link(name = "storage")]
extern "C" {
    fn libstorageNimMain();
    fn storage_new(
        config_json: *const c_char,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> *mut c_void;
    fn storage_start(ctx: *mut c_void, callback: StorageCallback, user_data: *mut c_void) -> c_int;
    fn storage_stop(ctx: *mut c_void, callback: StorageCallback, user_data: *mut c_void) -> c_int;
    fn storage_close(ctx: *mut c_void, callback: StorageCallback, user_data: *mut c_void) -> c_int;
    fn storage_destroy(ctx: *mut c_void, callback: StorageCallback, user_data: *mut c_void)
        -> c_int;
    fn storage_spr(ctx: *mut c_void, callback: StorageCallback, user_data: *mut c_void) -> c_int;
    fn storage_upload_init(
        ctx: *mut c_void,
        filepath: *const c_char,
        chunk_size: usize,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> c_int;
    fn storage_upload_file(
        ctx: *mut c_void,
        session_id: *const c_char,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> c_int;
    fn storage_download_init(
        ctx: *mut c_void,
        cid: *const c_char,
        chunk_size: usize,
        local: bool,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> c_int;
    fn storage_download_stream(
        ctx: *mut c_void,
        cid: *const c_char,
        chunk_size: usize,
        local: bool,
        filepath: *const c_char,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> c_int;
    fn storage_delete(
        ctx: *mut c_void,
        cid: *const c_char,
        callback: StorageCallback,
        user_data: *mut c_void,
    ) -> c_int;
}

static NIM_INIT: Once = Once::new();

unsafe extern "C" fn trampoline(
    ret: c_int,
    msg: *const c_char,
    len: usize,
    user_data: *mut c_void,
) {
    if user_data.is_null() {
        return;
    }
    let code = RetCode(ret);
    let bytes: &[u8] = if msg.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(msg as *const u8, len)
    };
    let cb = &mut *(user_data as *mut Callback);
    cb(code, bytes);
    if code != RetCode::PROGRESS {
        drop(Box::from_raw(user_data as *mut Callback));
    }
}

fn into_token(cb: Callback) -> *mut c_void {
    Box::into_raw(Box::new(cb)) as *mut c_void
}

/// Hand `cb` to a dispatch primitive; reclaim it if the library refuses the request.
fn dispatch(op: &'static str, cb: Callback, call: impl FnOnce(*mut c_void) -> c_int) -> Dispatch {
    let token = into_token(cb);
    let ret = call(token);
    if ret == RetCode::OK.0 {
        Dispatch::Accepted
    } else {
        // SAFETY: the library refused the request, so it never saw the token through a callback.
        drop(unsafe { Box::from_raw(token as *mut Callback) });
        warn!(op, ret, "libstorage rejected dispatch");
        Dispatch::Rejected
    }
}

fn c_path(path: &Path) -> Option<CString> {
    CString::new(path.to_string_lossy().into_owned()).ok()
}

fn ctx(node: NodeHandle) -> *mut c_void {
    node.as_raw() as *mut c_void
}

/// Engine backed by the native library. One per process is enough; the library runtime is
/// initialised on first construction.
pub struct LibStorage {
    _private: (),
}

impl LibStorage {
    pub fn new() -> Self {
        NIM_INIT.call_once(|| unsafe { libstorageNimMain() });
        Self { _private: () }
    }
}

impl Default for LibStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LibStorage {
    fn create(&self, config: &NodeConfig, on_done: Callback) -> Option<NodeHandle> {
        let json = match config.to_json() {
            Ok(json) => CString::new(json).ok()?,
            Err(e) => {
                warn!(error = %e, "node config not representable as JSON");
                return None;
            }
        };
        let token = into_token(on_done);
        let raw = unsafe { storage_new(json.as_ptr(), trampoline, token) };
        let handle = NodeHandle::from_raw(raw as usize);
        if handle.is_none() {
            drop(unsafe { Box::from_raw(token as *mut Callback) });
            warn!("libstorage refused to create a node");
        }
        handle
    }

    fn start(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        dispatch("start", on_done, |t| unsafe { storage_start(ctx(node), trampoline, t) })
    }

    fn stop(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        dispatch("stop", on_done, |t| unsafe { storage_stop(ctx(node), trampoline, t) })
    }

    fn close(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        dispatch("close", on_done, |t| unsafe { storage_close(ctx(node), trampoline, t) })
    }

    fn destroy(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        dispatch("destroy", on_done, |t| unsafe { storage_destroy(ctx(node), trampoline, t) })
    }

    fn spr(&self, node: NodeHandle, on_done: Callback) -> Dispatch {
        dispatch("spr", on_done, |t| unsafe { storage_spr(ctx(node), trampoline, t) })
    }

    fn upload_init(
        &self,
        node: NodeHandle,
        path: &Path,
        chunk_size: usize,
        on_done: Callback,
    ) -> Dispatch {
        let Some(path) = c_path(path) else {
            return Dispatch::Rejected;
        };
        dispatch("upload_init", on_done, |t| unsafe {
            storage_upload_init(ctx(node), path.as_ptr(), chunk_size, trampoline, t)
        })
    }

    fn upload_file(&self, node: NodeHandle, session_id: &str, on_event: Callback) -> Dispatch {
        let Ok(session) = CString::new(session_id) else {
            return Dispatch::Rejected;
        };
        dispatch("upload_file", on_event, |t| unsafe {
            storage_upload_file(ctx(node), session.as_ptr(), trampoline, t)
        })
    }

    fn download_init(
        &self,
        node: NodeHandle,
        cid: &str,
        chunk_size: usize,
        local: bool,
        on_done: Callback,
    ) -> Dispatch {
        let Ok(cid) = CString::new(cid) else {
            return Dispatch::Rejected;
        };
        dispatch("download_init", on_done, |t| unsafe {
            storage_download_init(ctx(node), cid.as_ptr(), chunk_size, local, trampoline, t)
        })
    }

    fn download_stream(
        &self,
        node: NodeHandle,
        cid: &str,
        chunk_size: usize,
        local: bool,
        dest: &Path,
        on_event: Callback,
    ) -> Dispatch {
        let (Ok(cid), Some(dest)) = (CString::new(cid), c_path(dest)) else {
            return Dispatch::Rejected;
        };
        dispatch("download_stream", on_event, |t| unsafe {
            storage_download_stream(
                ctx(node),
                cid.as_ptr(),
                chunk_size,
                local,
                dest.as_ptr(),
                trampoline,
                t,
            )
        })
    }

    fn delete(&self, node: NodeHandle, cid: &str, on_done: Callback) -> Dispatch {
        let Ok(cid) = CString::new(cid) else {
            return Dispatch::Rejected;
        };
        dispatch("delete", on_done, |t| unsafe {
            storage_delete(ctx(node), cid.as_ptr(), trampoline, t)
        })
    }
}
