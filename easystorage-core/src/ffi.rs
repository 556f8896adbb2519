//! C ABI for linking easystorage-core as a static library from C/C++ hosts.
//! Handles are boxed `StorageNode`s; strings returned to the host are released with
//! `e_storage_free_string`.

use std::ffi::{c_void, CStr, CString};
use std::io::{self, Write};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::ptr;
use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::completion::{Progress, ProgressFn};
use crate::config::NodeConfig;
use crate::engine::Engine;
use crate::node::StorageNode;

/// Node configuration as seen from C. Null strings mean "not set".
#[repr(C)]
pub struct EStorageConfig {
    pub api_port: c_int,
    pub disc_port: c_int,
    pub data_dir: *mut c_char,
    pub log_level: *mut c_char,
    pub bootstrap_node: *mut c_char,
    pub nat: *mut c_char,
}

/// Progress callback: (total, complete, status). `total` is 0 when unknown.
pub type EStorageProgress = Option<extern "C" fn(total: c_int, complete: c_int, status: c_int)>;

static ENGINE: OnceLock<Option<Arc<dyn Engine>>> = OnceLock::new();

fn engine() -> Option<Arc<dyn Engine>> {
    ENGINE
        .get_or_init(|| match crate::default_engine() {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!(error = %e, "storage engine unavailable");
                None
            }
        })
        .clone()
}

unsafe fn opt_string(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok().map(str::to_string)
}

unsafe fn node_ref<'a>(h: *mut c_void) -> Option<&'a StorageNode> {
    (h as *const StorageNode).as_ref()
}

fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn progress_fn(cb: EStorageProgress) -> Option<ProgressFn> {
    let cb = cb?;
    Some(Box::new(move |p: Progress| {
        cb(
            c_int::try_from(p.total).unwrap_or(c_int::MAX),
            c_int::try_from(p.completed).unwrap_or(c_int::MAX),
            p.status.0,
        )
    }))
}

/// Terminate the host's progress line once a transfer with a progress callback is over.
fn end_progress_line(cb: EStorageProgress) {
    if cb.is_some() {
        let mut out = io::stdout().lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn config_from_c(cfg: &EStorageConfig) -> Option<NodeConfig> {
    let port = |p: c_int| u16::try_from(p).ok();
    unsafe {
        Some(NodeConfig {
            api_port: port(cfg.api_port)?,
            disc_port: port(cfg.disc_port)?,
            data_dir: opt_string(cfg.data_dir).map(PathBuf::from),
            log_level: opt_string(cfg.log_level),
            bootstrap_node: opt_string(cfg.bootstrap_node),
            nat: opt_string(cfg.nat),
        })
    }
}

/// Create a node. Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn e_storage_new(config: *const EStorageConfig) -> *mut c_void {
    let Some(cfg) = (unsafe { config.as_ref() }) else {
        return ptr::null_mut();
    };
    let (Some(config), Some(engine)) = (config_from_c(cfg), engine()) else {
        return ptr::null_mut();
    };
    match StorageNode::new(engine, &config) {
        Ok(node) => Box::into_raw(Box::new(node)) as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// Returns 0 on success, -1 on failure or null h.
#[no_mangle]
pub extern "C" fn e_storage_start(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) } {
        Some(node) => status(node.start()),
        None => -1,
    }
}

/// Returns 0 on success, -1 on failure or null h.
#[no_mangle]
pub extern "C" fn e_storage_stop(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) } {
        Some(node) => status(node.stop()),
        None => -1,
    }
}

/// Returns 0 on success, -1 on failure or null h.
#[no_mangle]
pub extern "C" fn e_storage_close(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) } {
        Some(node) => status(node.close()),
        None => -1,
    }
}

/// Close (tolerating failure) and destroy the node, then free the handle. h is invalid afterwards.
#[no_mangle]
pub extern "C" fn e_storage_destroy(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let mut node = unsafe { Box::from_raw(h as *mut StorageNode) };
    status(node.destroy())
}

/// Signed peer record of the node (free with e_storage_free_string), or null on failure.
#[no_mangle]
pub extern "C" fn e_storage_spr(h: *mut c_void) -> *mut c_char {
    match unsafe { node_ref(h) }.map(StorageNode::spr) {
        Some(Ok(spr)) => into_c_string(spr),
        _ => ptr::null_mut(),
    }
}

/// Upload a file. Returns the content id (free with e_storage_free_string), or null on failure.
#[no_mangle]
pub extern "C" fn e_storage_upload(
    h: *mut c_void,
    filepath: *const c_char,
    cb: EStorageProgress,
) -> *mut c_char {
    let node = unsafe { node_ref(h) };
    let path = unsafe { opt_string(filepath) };
    let (Some(node), Some(path)) = (node, path) else {
        return ptr::null_mut();
    };
    let result = node.upload(path, progress_fn(cb));
    end_progress_line(cb);
    match result {
        Ok(cid) => into_c_string(cid),
        Err(_) => ptr::null_mut(),
    }
}

/// Download `cid` to `filepath`. Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn e_storage_download(
    h: *mut c_void,
    cid: *const c_char,
    filepath: *const c_char,
    cb: EStorageProgress,
) -> c_int {
    let node = unsafe { node_ref(h) };
    let cid = unsafe { opt_string(cid) };
    let path = unsafe { opt_string(filepath) };
    let (Some(node), Some(cid), Some(path)) = (node, cid, path) else {
        return -1;
    };
    let result = node.download(&cid, path, progress_fn(cb));
    end_progress_line(cb);
    status(result)
}

/// Delete `cid` from the node's store. Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn e_storage_delete(h: *mut c_void, cid: *const c_char) -> c_int {
    let node = unsafe { node_ref(h) };
    let cid = unsafe { opt_string(cid) };
    let (Some(node), Some(cid)) = (node, cid) else {
        return -1;
    };
    status(node.delete(&cid))
}

/// Release a string returned by this library. No-op if s is null.
#[no_mangle]
pub extern "C" fn e_storage_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    let _ = unsafe { CString::from_raw(s) };
}

/// Fill `out` from the INI file at `filepath`, starting from defaults.
/// Strings in `out` are owned by the library until e_storage_free_config. Returns 0 or -1.
#[no_mangle]
pub extern "C" fn e_storage_read_config(
    filepath: *const c_char,
    out: *mut EStorageConfig,
) -> c_int {
    let path = unsafe { opt_string(filepath) };
    let out = unsafe { out.as_mut() };
    let (Some(path), Some(out)) = (path, out) else {
        return -1;
    };
    let config = match NodeConfig::read_ini(path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "reading config failed");
            return -1;
        }
    };
    let opt = |s: Option<String>| s.map(into_c_string).unwrap_or(ptr::null_mut());
    out.api_port = c_int::from(config.api_port);
    out.disc_port = c_int::from(config.disc_port);
    out.data_dir = opt(config.data_dir.map(|d| d.to_string_lossy().into_owned()));
    out.log_level = opt(config.log_level);
    out.bootstrap_node = opt(config.bootstrap_node);
    out.nat = opt(config.nat);
    0
}

/// Free the strings of a config filled by e_storage_read_config and null them out.
#[no_mangle]
pub extern "C" fn e_storage_free_config(conf: *mut EStorageConfig) {
    let Some(conf) = (unsafe { conf.as_mut() }) else {
        return;
    };
    for field in [
        &mut conf.data_dir,
        &mut conf.log_level,
        &mut conf.bootstrap_node,
        &mut conf.nat,
    ] {
        e_storage_free_string(*field);
        *field = ptr::null_mut();
    }
}
