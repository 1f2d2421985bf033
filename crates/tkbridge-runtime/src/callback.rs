//! Per-interpreter table of host closures callable from scripts.
//!
//! Scripts reach a registered closure through the integration command
//! `host_callback <id> ?arg ...?`. Ids have the form `cb<N>`, start at
//! `cb1` and are never reused while the registry lives.
//!
//! ```
//! use tkbridge_runtime::callback::CallbackRegistry;
//! use tkbridge_runtime::Outcome;
//!
//! let registry = CallbackRegistry::new();
//! let id = registry.register(|args: &[String]| args.join("+"));
//! assert_eq!(id, "cb1");
//!
//! let out = registry.dispatch(&id, &["a".into(), "b".into()]).unwrap();
//! assert_eq!(out, Outcome::normal("a+b"));
//! ```

use crate::error::{BridgeError, BridgeResult};
use crate::signal::{CallbackScope, IntoOutcome, Outcome, protect};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Name of the integration command that dispatches into this registry.
pub const CALLBACK_COMMAND: &str = "host_callback";

type HostFn = Arc<dyn Fn(&[String]) -> Outcome + Send + Sync>;

/// Maps callback ids to host closures.
pub struct CallbackRegistry {
    entries: DashMap<String, HostFn>,
    /// Starts at 1; ids are handed out in strictly increasing order.
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store `callback` and return its new id.
    pub fn register<F, R>(&self, callback: F) -> String
    where
        F: Fn(&[String]) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("cb{}", n);
        self.entries.insert(
            id.clone(),
            Arc::new(move |args: &[String]| callback(args).into_outcome()),
        );
        trace!(%id, "callback registered");
        id
    }

    /// Remove a callback. Unknown ids are ignored; returns whether one was
    /// removed.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort_by_key(|id| id[2..].parse::<u64>().unwrap_or(u64::MAX));
        ids
    }

    /// Command prefix that invokes `id` from a script.
    pub fn callback_command(id: &str) -> String {
        format!("{} {}", CALLBACK_COMMAND, id)
    }

    /// Run the callback registered as `id` with `args`.
    ///
    /// Panics inside the closure become [`Outcome::Error`]. Fatal signals
    /// keep unwinding.
    pub fn dispatch(&self, id: &str, args: &[String]) -> BridgeResult<Outcome> {
        // Clone out so the shard lock is not held while host code runs; the
        // closure may register or unregister callbacks itself.
        let callback = self
            .entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BridgeError::UnknownCallback(id.to_string()))?;

        let _scope = CallbackScope::enter();
        Ok(protect(|| callback(args)))
    }

    /// Drop every callback. Closures are dropped outside the map's locks
    /// since they may own handles whose teardown comes back here.
    pub(crate) fn clear(&self) {
        for id in self.ids() {
            let removed = self.entries.remove(&id);
            drop(removed);
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
