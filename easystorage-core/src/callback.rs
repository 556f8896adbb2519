//! Continuations handed to the engine. Each one owns a reference to its completion cell and
//! releases it when the engine drops the continuation.

use std::sync::Arc;

use crate::completion::Completion;
use crate::engine::{Callback, RetCode};

/// Continuation for operations with no progress phase: the first notice resolves the cell.
pub fn on_complete(cell: &Arc<Completion>) -> Callback {
    let cell = Arc::clone(cell);
    Box::new(move |code, msg| {
        cell.resolve(code, msg);
    })
}

/// Continuation for streaming operations: [`RetCode::PROGRESS`] notices add their message length
/// to the running total and feed the progress handler; any other code resolves the cell.
pub fn on_progress(cell: &Arc<Completion>) -> Callback {
    let cell = Arc::clone(cell);
    Box::new(move |code, msg| {
        if code == RetCode::PROGRESS {
            cell.record_progress(msg.len(), code);
        } else {
            cell.resolve(code, msg);
        }
    })
}
