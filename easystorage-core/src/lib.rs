//! Blocking node API over an asynchronous storage engine.
//! The engine dispatches and answers later on its own threads; the bridge turns each dispatch
//! into a bounded blocking call.

pub mod bridge;
pub mod callback;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod local;
pub mod node;
pub mod transfer;

#[cfg(feature = "libstorage")]
pub mod libstorage;

#[cfg(test)]
mod mock;

use std::sync::Arc;

pub use bridge::{WaitPolicy, DEFAULT_WAIT_TIMEOUT};
pub use completion::{Progress, ProgressFn};
pub use config::{ConfigError, NodeConfig};
pub use engine::{Callback, Dispatch, Engine, NodeHandle, RetCode};
pub use error::{Error, Result};
pub use local::LocalEngine;
pub use node::StorageNode;
pub use transfer::DEFAULT_CHUNK_SIZE;

/// Engine used when the host does not bring its own: the native library when built with the
/// `libstorage` feature, otherwise the in-process [`LocalEngine`].
pub fn default_engine() -> Result<Arc<dyn Engine>> {
    #[cfg(feature = "libstorage")]
    {
        Ok(Arc::new(libstorage::LibStorage::new()))
    }
    #[cfg(not(feature = "libstorage"))]
    {
        Ok(Arc::new(LocalEngine::new()?))
    }
}
