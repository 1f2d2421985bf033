//! Control-signal translation between host callbacks and the interpreter.
//!
//! Host closures report how they finished with an explicit [`Outcome`]. The
//! mapping onto interpreter completion codes is a fixed table:
//!
//! | Outcome          | interpreter result                 |
//! |------------------|------------------------------------|
//! | `Normal(v)`      | ok, result `v` (empty when `None`) |
//! | `Break`          | break (3)                          |
//! | `Continue`       | continue (4)                       |
//! | `Return(v)`      | return (2), result `v`             |
//! | `Error(msg)`     | error (1), result `msg`            |
//! | `Fatal(signal)`  | not mapped; unwinds                |
//!
//! Fatal signals are carried as an unwinding payload so that no interpreter
//! frame can swallow them. Only the public entry points of this crate catch
//! them, and they hand them back unchanged as [`BridgeError::Fatal`].

use crate::error::{BridgeError, BridgeResult};
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use tkbridge_tcl::{Code, Exception, TclResult};
use tracing::error;

/// A process-fatal signal raised by host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalSignal {
    /// Interrupt request (Ctrl-C or [`Bridge::interrupt`](crate::Bridge::interrupt)).
    Interrupt,
    /// Request to exit the process with a status code.
    Exit(i32),
}

impl fmt::Display for FatalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Exit(code) => write!(f, "exit({})", code),
        }
    }
}

/// How a host callback finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Normal(Option<String>),
    Break,
    Continue,
    Return(Option<String>),
    Error(String),
    Fatal(FatalSignal),
}

impl Outcome {
    pub fn normal(value: impl Into<String>) -> Self {
        Self::Normal(Some(value.into()))
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self::Error(message.to_string())
    }
}

impl From<BridgeError> for Outcome {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Fatal(signal) => Self::Fatal(signal),
            other => Self::Error(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for Outcome {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<BridgeError>() {
            Ok(bridge) => bridge.into(),
            Err(other) => Self::Error(format!("{:#}", other)),
        }
    }
}

impl From<FatalSignal> for Outcome {
    fn from(signal: FatalSignal) -> Self {
        Self::Fatal(signal)
    }
}

/// Values a host callback may return.
///
/// `Result<T, E>` is accepted for any `E: Into<Outcome>`, so callbacks can
/// use `?` on bridge calls and fatal signals keep propagating.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(None)
    }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(Some(self))
    }
}

impl IntoOutcome for &str {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(Some(self.to_string()))
    }
}

impl IntoOutcome for bool {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(Some(if self { "1" } else { "0" }.to_string()))
    }
}

macro_rules! display_outcome {
    ($($ty:ty),*) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Outcome {
                    Outcome::Normal(Some(self.to_string()))
                }
            }
        )*
    };
}

display_outcome!(i32, i64, u32, u64, usize, f64);

impl<T: fmt::Display> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(self.map(|v| v.to_string()))
    }
}

impl<T: IntoOutcome, E: Into<Outcome>> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => value.into_outcome(),
            Err(e) => e.into(),
        }
    }
}

/// Map a host outcome onto an interpreter completion. A fatal outcome does
/// not return; it starts unwinding with the signal as payload.
pub fn to_foreign(outcome: Outcome) -> TclResult {
    match outcome {
        Outcome::Normal(value) => Ok(value.unwrap_or_default()),
        Outcome::Break => Err(Exception::brk()),
        Outcome::Continue => Err(Exception::cont()),
        Outcome::Return(value) => Err(Exception::ret(value.unwrap_or_default())),
        Outcome::Error(message) => Err(Exception::error(message)),
        Outcome::Fatal(signal) => raise_fatal(signal),
    }
}

/// Map an interpreter completion back onto an outcome.
pub fn from_foreign(result: TclResult) -> Outcome {
    match result {
        Ok(value) => Outcome::Normal(Some(value)),
        Err(e) => match e.code {
            Code::Ok => Outcome::Normal(Some(e.value)),
            Code::Error => Outcome::Error(e.value),
            Code::Return => Outcome::Return(Some(e.value)),
            Code::Break => Outcome::Break,
            Code::Continue => Outcome::Continue,
        },
    }
}

/// Start unwinding with `signal` as payload. Does not run the panic hook.
pub fn raise_fatal(signal: FatalSignal) -> ! {
    resume_unwind(Box::new(signal))
}

fn fatal_payload(payload: &(dyn Any + Send)) -> Option<FatalSignal> {
    payload.downcast_ref::<FatalSignal>().copied()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown error".to_string()
    }
}

/// Run `f`, turning a fatal unwind into `Err(BridgeError::Fatal)`. Any other
/// panic keeps unwinding.
///
/// Only the outermost entry point stops a fatal signal. Inside a host
/// callback it keeps unwinding, so the callback cannot drop it.
pub(crate) fn catch_fatal<T>(f: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => match fatal_payload(payload.as_ref()) {
            Some(signal) if !in_callback() => Err(BridgeError::Fatal(signal)),
            _ => resume_unwind(payload),
        },
    }
}

/// A fatal error that reached a host callback as a value, for instance the
/// reply from another thread, starts unwinding again.
pub(crate) fn escalate<T>(result: BridgeResult<T>) -> BridgeResult<T> {
    match result {
        Err(BridgeError::Fatal(signal)) if in_callback() => raise_fatal(signal),
        other => other,
    }
}

/// Result of running host code at a dispatch boundary.
pub(crate) enum Guarded<T> {
    Done(T),
    /// A fatal signal; the payload must be resumed once the caller has
    /// been told.
    Fatal(FatalSignal, Box<dyn Any + Send>),
}

/// Run host code at a dispatch boundary. Ordinary panics become evaluation
/// errors; fatal signals are handed back for re-raising.
pub(crate) fn guard<T>(
    f: impl FnOnce() -> BridgeResult<T>,
    what: &str,
) -> Guarded<BridgeResult<T>> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Guarded::Done(result),
        Err(payload) => match fatal_payload(payload.as_ref()) {
            Some(signal) => Guarded::Fatal(signal, payload),
            None => {
                let message =
                    format!("{} panicked: {}", what, panic_message(payload.as_ref()));
                error!("{}", message);
                Guarded::Done(Err(BridgeError::eval(message)))
            }
        },
    }
}

/// Run a host callback body. Ordinary panics become [`Outcome::Error`];
/// fatal signals keep unwinding.
pub(crate) fn protect(f: impl FnOnce() -> Outcome) -> Outcome {
    match guard(|| Ok(f()), "host callback") {
        Guarded::Done(Ok(outcome)) => outcome,
        Guarded::Done(Err(e)) => Outcome::Error(e.to_string()),
        Guarded::Fatal(_, payload) => resume_unwind(payload),
    }
}

thread_local! {
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is running a host callback.
pub fn in_callback() -> bool {
    CALLBACK_DEPTH.with(|depth| depth.get() > 0)
}

/// Marks the current thread as inside a callback until dropped.
pub(crate) struct CallbackScope(());

impl CallbackScope {
    pub(crate) fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self(())
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
