//! A small Tcl-flavoured command interpreter with a per-thread event loop.
//!
//! This crate is the single-threaded runtime that `tkbridge-runtime` embeds.
//! It has the shape of a classic embeddable interpreter:
//!
//! - [`Interp`] objects that are bound to the thread that created them
//!   (`!Send`), evaluate scripts, and host commands registered from Rust.
//! - A per-thread [`notifier`] with timers, idle handlers, and a queue that
//!   other threads can post `Send` closures into.
//! - Completion codes ([`Code`]) for `ok`, `error`, `return`, `break` and
//!   `continue`.
//!
//! # Example
//!
//! ```
//! use tkbridge_tcl::Interp;
//!
//! tkbridge_tcl::initialize();
//! let interp = Interp::new().unwrap();
//! interp.create_command("double", |_, args| {
//!     let n: i64 = args[1].parse().unwrap_or(0);
//!     Ok((n * 2).to_string())
//! });
//! assert_eq!(interp.eval("double [expr {1 + 2}]").unwrap(), "6");
//! ```
//!
//! # Thread safety
//!
//! Interpreters cannot leave their thread:
//!
//! ```compile_fail
//! use tkbridge_tcl::Interp;
//! tkbridge_tcl::initialize();
//! let interp = Interp::new().unwrap();
//! std::thread::spawn(move || interp.eval("set x 1"));
//! ```

mod commands;
mod error;
mod expr;
mod interp;
mod list;
pub mod notifier;
mod parser;

pub use error::{Code, Exception, TclError, TclResult};
pub use interp::{CommandFn, Interp};
pub use list::{merge_list, quote_element, split_list};

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time process setup. Must run before the first [`Interp`] is created;
/// later calls do nothing.
pub fn initialize() {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        info!(version = PATCH_LEVEL, "interpreter runtime initialized");
    }
}

/// Whether [`initialize`] has run.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Full version string, also stored in the `tcl_patchLevel` variable.
pub const PATCH_LEVEL: &str = env!("CARGO_PKG_VERSION");

/// Release stage of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseLevel {
    Alpha = 0,
    Beta = 1,
    Final = 2,
}

/// Version components as reported by [`get_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub release_level: ReleaseLevel,
    pub serial: u32,
}

/// Version of the runtime linked into this process.
pub fn get_version() -> Version {
    let component = |text: &str| text.parse().unwrap_or(0);
    Version {
        major: component(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: component(env!("CARGO_PKG_VERSION_MINOR")),
        release_level: if env!("CARGO_PKG_VERSION_PRE").is_empty() {
            ReleaseLevel::Final
        } else {
            ReleaseLevel::Beta
        },
        serial: component(env!("CARGO_PKG_VERSION_PATCH")),
    }
}

/// `major.minor`, stored in the `tcl_version` variable.
pub(crate) fn version_string() -> String {
    let v = get_version();
    format!("{}.{}", v.major, v.minor)
}
