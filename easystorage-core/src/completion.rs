//! Completion cell: the single result slot shared by a blocked caller and the engine's callback.
//!
//! The waiter and the continuation each hold an `Arc` to the cell, so whichever lets go last
//! frees it, whether the callback fires before, during or after the waiter's budget.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::engine::RetCode;

/// Progress report passed to a [`ProgressFn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Total units expected, 0 when unknown.
    pub total: u64,
    /// Units completed so far in this operation.
    pub completed: u64,
    pub status: RetCode,
}

/// Caller-supplied progress handler. Runs on the engine's thread; keep it cheap.
pub type ProgressFn = Box<dyn FnMut(Progress) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Ok,
    Failed(RetCode),
}

impl Outcome {
    pub fn is_pending(self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

struct State {
    outcome: Outcome,
    payload: Option<Vec<u8>>,
    progress: Option<ProgressFn>,
    bytes_done: u64,
    /// Set once the waiter has extracted (or given up on) the result.
    waiter_gone: bool,
}

pub struct Completion {
    state: Mutex<State>,
    resolved: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_progress(progress: Option<ProgressFn>) -> Arc<Self> {
        Self::build(progress)
    }

    fn build(progress: Option<ProgressFn>) -> Arc<Self> {
        Arc::new(Completion {
            state: Mutex::new(State {
                outcome: Outcome::Pending,
                payload: None,
                progress,
                bytes_done: 0,
                waiter_gone: false,
            }),
            resolved: Condvar::new(),
        })
    }

    pub fn outcome(&self) -> Outcome {
        self.state.lock().outcome
    }

    /// Units reported by progress notices so far.
    pub fn bytes_done(&self) -> u64 {
        self.state.lock().bytes_done
    }

    /// Account a progress notice of `len` units. Leaves the outcome untouched.
    pub(crate) fn record_progress(&self, len: usize, status: RetCode) {
        let mut state = self.state.lock();
        state.bytes_done = state.bytes_done.saturating_add(len as u64);
        let completed = state.bytes_done;
        if let Some(sink) = state.progress.as_mut() {
            sink(Progress {
                total: 0,
                completed,
                status,
            });
        }
    }

    /// Terminal notice. Returns false if the cell was already resolved (the notice is dropped).
    pub(crate) fn resolve(&self, code: RetCode, msg: &[u8]) -> bool {
        let mut state = self.state.lock();
        if !state.outcome.is_pending() {
            warn!(%code, "second terminal notice for one operation ignored");
            return false;
        }
        if !msg.is_empty() {
            state.payload = Some(msg.to_vec());
        }
        state.outcome = if code.is_ok() {
            Outcome::Ok
        } else {
            Outcome::Failed(code)
        };
        if state.waiter_gone {
            debug!(%code, "operation completed after the caller stopped waiting");
        }
        self.resolved.notify_all();
        true
    }

    /// Block until resolved or `timeout` elapses. Returns true if resolved.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let _ = self
            .resolved
            .wait_while_for(&mut state, |s| s.outcome.is_pending(), timeout);
        !state.outcome.is_pending()
    }

    /// Hand the result to the waiter: current outcome plus the payload, moved out.
    /// Marks the waiter as gone; later notices only touch the cell until the engine drops it.
    pub(crate) fn take(&self) -> (Outcome, Option<Vec<u8>>) {
        let mut state = self.state.lock();
        state.waiter_gone = true;
        (state.outcome, state.payload.take())
    }
}
