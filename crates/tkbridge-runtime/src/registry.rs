//! Process-wide bookkeeping of live interpreter handles.
//!
//! Entries are held weakly, so the registry never keeps an interpreter
//! alive. Handles unregister themselves on explicit deletion and when the
//! runtime reports the interpreter gone.

use crate::handle::{HandleShared, Interpreter};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: Mutex<Vec<(u64, Weak<HandleShared>)>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, shared: &Arc<HandleShared>) {
        let id = shared.id;
        self.entries.lock().push((id, Arc::downgrade(shared)));
        trace!(id, "interpreter registered");
    }

    /// Remove `id`. Returns whether it was present.
    pub(crate) fn unregister(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        let removed = entries.len() != before;
        if removed {
            trace!(id, "interpreter unregistered");
        }
        removed
    }

    /// Number of live handles. Prunes entries whose handles are gone.
    pub fn count(&self) -> usize {
        self.entries.lock().retain(|(_, weak)| weak.strong_count() > 0);
        self.list().len()
    }

    /// Live handles in registration order.
    pub fn list(&self) -> Vec<Interpreter> {
        // Upgrade under the lock but drop nothing there: releasing the last
        // strong reference unregisters, which takes the lock again.
        let live: Vec<Arc<HandleShared>> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        live.into_iter()
            .filter(|shared| !shared.is_deleted())
            .map(Interpreter::from_shared)
            .collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().iter().any(|(entry, _)| *entry == id)
    }
}
