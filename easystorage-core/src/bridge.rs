//! Completion bridge: turns an accepted dispatch into a bounded blocking call.
//!
//! Callers dispatch first, handing the engine a continuation built from the cell
//! (see [`crate::callback`]), then pass the dispatch answer and the cell here.
//!
//! ```ignore
//! let cell = Completion::new();
//! let dispatch = engine.start(node, callback::on_complete(&cell));
//! bridge::call_wait("start", dispatch, cell, false, policy)?;
//! ```

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::completion::{Completion, Outcome};
use crate::engine::Dispatch;
use crate::error::{Error, Result};

/// Default wait budget, 1000 ticks of 100 ms.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(100);

/// How long a blocked caller waits for the terminal notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Wait for `cell` to resolve and extract the result.
///
/// A rejected dispatch returns [`Error::Rejected`] at once and releases the cell. When the budget
/// runs out the call is logged with its call site and the current state is reported anyway: a cell
/// that is still pending maps to [`Error::Failed`] with no code. The engine is never told to stop;
/// a late notice lands in the cell, which is freed when the engine drops its continuation.
///
/// With `want_payload`, a successful call returns the terminal message as an owned string
/// (None if the engine sent an empty message).
#[track_caller]
pub fn call_wait(
    op: &'static str,
    dispatch: Dispatch,
    cell: Arc<Completion>,
    want_payload: bool,
    policy: WaitPolicy,
) -> Result<Option<String>> {
    let site = Location::caller();
    if !dispatch.is_accepted() {
        debug!(op, "dispatch rejected");
        return Err(Error::Rejected { op });
    }

    if !cell.wait(policy.timeout) {
        error!(
            op,
            site = %site,
            timeout_ms = policy.timeout.as_millis() as u64,
            "CRITICAL: call timed out"
        );
    }

    let (outcome, payload) = cell.take();
    drop(cell);
    let message = payload.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    match outcome {
        Outcome::Ok => {
            debug!(op, "completed");
            Ok(if want_payload { message } else { None })
        }
        Outcome::Failed(code) => {
            debug!(op, %code, "engine reported failure");
            Err(Error::Failed {
                op,
                code: Some(code),
                message,
            })
        }
        Outcome::Pending => Err(Error::Failed {
            op,
            code: None,
            message: None,
        }),
    }
}
