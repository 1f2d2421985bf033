//! Error types for tkbridge-runtime

use crate::signal::FatalSignal;
use thiserror::Error;
use tkbridge_tcl::{Code, Exception, TclError};

/// Errors surfaced by the bridge.
///
/// Control signals (break, continue, return) are never errors; they travel
/// as [`Outcome`](crate::signal::Outcome) values. Errors crossing threads
/// keep their variant, so a waiting caller sees exactly what the owning
/// thread produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The embedded runtime could not be initialized or the interpreter
    /// could not be created.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// A script or command failed inside the interpreter.
    #[error("{message}")]
    Eval { message: String },

    /// The caller passed an argument the operation cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The interpreter behind this handle has been deleted.
    #[error("Interpreter has been deleted")]
    Deleted,

    /// No callback is registered under this id.
    #[error("Unknown callback id: {0}")]
    UnknownCallback(String),

    /// A blocking wait hit the configured timeout before the owning thread
    /// answered.
    #[error("Timed out waiting for the owning thread")]
    Timeout,

    /// The owning thread exited before it served the command.
    #[error("Owning thread exited before serving the command")]
    OwnerGone,

    /// A process-fatal signal. Never swallowed by the bridge.
    #[error("Fatal signal: {0}")]
    Fatal(FatalSignal),
}

impl BridgeError {
    /// Create an evaluation error
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether this error carries a fatal signal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<TclError> for BridgeError {
    fn from(e: TclError) -> Self {
        match e {
            TclError::NoNotifier(_) => Self::OwnerGone,
            other => Self::Initialization(other.to_string()),
        }
    }
}

impl From<Exception> for BridgeError {
    fn from(e: Exception) -> Self {
        match e.code {
            Code::Error => Self::eval(e.value),
            code => Self::eval(format!("invoked \"{}\" outside of a loop", code)),
        }
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
