//! tkbridge-runtime - thread-safe access to a single-threaded interpreter.
//!
//! The embedded interpreter ([`tkbridge_tcl::Interp`]) may only be touched by
//! the thread that created it. This crate wraps it in an [`Interpreter`]
//! handle that any thread can use:
//!
//! - On the owning thread calls run in place.
//! - From other threads calls are queued, the owner's event loop is woken,
//!   and the caller blocks (or awaits) until the result comes back.
//! - Scripts call back into Rust closures through `host_callback <id>`,
//!   and closures steer the script with an explicit [`Outcome`]
//!   (`Break`, `Continue`, `Return`, `Error`).
//!
//! # Example
//!
//! ```
//! use tkbridge_runtime::{InterpreterConfig, InterpreterThread};
//!
//! let worker = InterpreterThread::spawn(InterpreterConfig::default()).unwrap();
//! let interp = worker.handle().clone();
//!
//! // From any thread
//! let sum = std::thread::spawn(move || interp.evaluate("expr {40 + 2}"))
//!     .join()
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(sum, "42");
//!
//! worker.shutdown().unwrap();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  any thread          Interpreter (Arc, Send + Sync)          │
//! │                        │                                     │
//! │                        ↓  Command (Eval / Invoke / Closure)  │
//! │                     Dispatcher (FIFO queue + stats)          │
//! └────────────────────────┼─────────────────────────────────────┘
//!                          ↓  one wake event per command
//! ┌──────────────────────────────────────────────────────────────┐
//! │  owning thread       MainLoop ─► do_one_event                │
//! │                        │                                     │
//! │                        ↓                                     │
//! │                     Interp (!Send, thread-local slot)        │
//! │                        │  host_callback <id> args...         │
//! │                        ↓                                     │
//! │                     CallbackRegistry ─► Outcome ─► code      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
mod handle;
mod local;
pub mod mainloop;
pub mod registry;
pub mod signal;
mod worker;

pub use bridge::Bridge;
pub use callback::{CALLBACK_COMMAND, CallbackRegistry};
pub use config::{BridgeConfig, InterpreterConfig};
pub use dispatch::{Command, DispatchStats, DispatchStatsSnapshot, ResultEnvelope};
pub use error::{BridgeError, BridgeResult};
pub use handle::{HOST_EVAL_COMMAND, Interpreter};
pub use mainloop::{LoopState, MainLoop, process_one_event};
pub use registry::InstanceRegistry;
pub use signal::{FatalSignal, IntoOutcome, Outcome, in_callback};
pub use tkbridge_tcl::notifier::EventFlags;
pub use tkbridge_tcl::{ReleaseLevel, Version};
pub use worker::InterpreterThread;

/// Drive the current thread's event loop using the process-wide bridge.
/// See [`Bridge::run_global_loop`].
pub fn run_global_loop(terminate_when_idle: bool) -> BridgeResult<()> {
    Bridge::global().run_global_loop(terminate_when_idle)
}

/// Version of the embedded runtime.
pub fn runtime_version() -> Version {
    tkbridge_tcl::get_version()
}

pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::config::{BridgeConfig, InterpreterConfig};
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::handle::Interpreter;
    pub use crate::signal::{FatalSignal, IntoOutcome, Outcome};
    pub use crate::worker::InterpreterThread;
    pub use tkbridge_tcl::notifier::EventFlags;
}
