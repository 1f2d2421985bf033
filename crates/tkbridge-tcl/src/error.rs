//! Completion codes and error types for the interpreter.

use std::fmt;
use thiserror::Error;

/// Completion code of a command or script.
///
/// The numeric values match the classic Tcl return codes and are what
/// `catch` reports back to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Error = 1,
    Return = 2,
    Break = 3,
    Continue = 4,
}

impl Code {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse the value of a `-code` option.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ok" | "0" => Some(Self::Ok),
            "error" | "1" => Some(Self::Error),
            "return" | "2" => Some(Self::Return),
            "break" | "3" => Some(Self::Break),
            "continue" | "4" => Some(Self::Continue),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Return => "return",
            Self::Break => "break",
            Self::Continue => "continue",
        };
        f.write_str(name)
    }
}

/// A non-OK completion: an error or a control-flow code travelling up the
/// evaluation stack, together with the interpreter result at that point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{value}")]
pub struct Exception {
    pub code: Code,
    pub value: String,
}

impl Exception {
    pub fn new(code: Code, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Code::Error, message)
    }

    pub fn brk() -> Self {
        Self::new(Code::Break, "")
    }

    pub fn cont() -> Self {
        Self::new(Code::Continue, "")
    }

    pub fn ret(value: impl Into<String>) -> Self {
        Self::new(Code::Return, value)
    }

    pub fn is_error(&self) -> bool {
        self.code == Code::Error
    }

    /// Standard "wrong # args" diagnostic.
    pub fn wrong_args(usage: &str) -> Self {
        Self::error(format!("wrong # args: should be \"{}\"", usage))
    }
}

/// Result of evaluating a script or invoking a command.
pub type TclResult = Result<String, Exception>;

/// Failures of the runtime itself, as opposed to script errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TclError {
    /// `initialize` has not been called in this process.
    #[error("interpreter runtime not initialized")]
    NotInitialized,

    /// The target thread has no notifier (it never created an interpreter
    /// or has already exited).
    #[error("no notifier registered for thread {0}")]
    NoNotifier(String),

    /// Creating an interpreter failed.
    #[error("failed to create interpreter: {0}")]
    Creation(String),
}
