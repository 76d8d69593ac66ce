//! Bridge error types.

use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),
    #[error("transport error: {0}")]
    Transport(SmolStr),
    #[error("parse error: {0}")]
    Parse(SmolStr),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("adapter error: {0}")]
    Adapter(SmolStr),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a single action dispatch did not produce a result.
///
/// None of these change the handshake state; the request is dropped and the
/// machine tool has to raise it again.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("no goal schema registered for action '{0}'")]
    UnknownAction(SmolStr),
    #[error("goal for '{action}' has {found} value(s), schema expects {expected}")]
    SchemaMismatch {
        action: SmolStr,
        expected: usize,
        found: usize,
    },
    #[error("goal element <{element}> for '{action}' not present in current snapshot")]
    GoalElementMissing { action: SmolStr, element: SmolStr },
    #[error("field '{field}' of '{action}' cannot hold '{value}'")]
    InvalidField {
        action: SmolStr,
        field: SmolStr,
        value: SmolStr,
    },
    #[error("current snapshot unavailable: {0}")]
    Snapshot(SmolStr),
    #[error("remote action '{action}' failed: {message}")]
    Remote { action: SmolStr, message: SmolStr },
    #[error("remote action '{action}' finished with status {status}")]
    Rejected { action: SmolStr, status: SmolStr },
}

impl DispatchError {
    pub(crate) fn remote(action: &str, message: impl std::fmt::Display) -> Self {
        Self::Remote {
            action: SmolStr::new(action),
            message: SmolStr::new(message.to_string()),
        }
    }
}
