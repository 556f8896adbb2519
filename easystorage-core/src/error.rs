//! Errors surfaced by the blocking node API.

use crate::engine::RetCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required argument missing or node already destroyed. Nothing was dispatched.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The engine refused the request; no notice will follow.
    #[error("{op}: request rejected by engine")]
    Rejected { op: &'static str },
    /// Engine reported a failure code, or no terminal notice arrived in time (`code` is None).
    #[error("{op} failed{}", describe(.code, .message))]
    Failed {
        op: &'static str,
        code: Option<RetCode>,
        message: Option<String>,
    },
    /// Success reported without the payload the operation returns.
    #[error("{op}: engine returned an empty reply")]
    EmptyReply { op: &'static str },
    #[error("engine runtime: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(code: &Option<RetCode>, message: &Option<String>) -> String {
    match (code, message) {
        (None, _) => " (no completion received)".to_string(),
        (Some(code), None) => format!(" ({})", code),
        (Some(code), Some(msg)) => format!(" ({}): {}", code, msg),
    }
}
