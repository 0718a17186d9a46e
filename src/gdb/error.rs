//! Engine error types

use crate::gdb::state::DebuggerState;
use thiserror::Error;

/// Errors reported by the engine and its configuration layer.
///
/// Malformed debugger output is never an error: it degrades to
/// [`MiValue::Invalid`](crate::gdb::value::MiValue::Invalid) or is dropped
/// with a diagnostic.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: DebuggerState,
        to: DebuggerState,
    },

    #[error("operation requires a stopped inferior, engine is {0:?}")]
    NotStopped(DebuggerState),

    #[error("token barrier violated by pending command {token} ({command})")]
    BarrierViolation { token: u64, command: String },

    #[error("a continuation is already registered")]
    ContinuationPending,

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown session command: {0}")]
    UnknownCommand(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
