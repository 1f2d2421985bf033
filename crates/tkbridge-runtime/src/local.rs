//! Per-thread table of the foreign interpreters a thread owns.
//!
//! The foreign [`Interp`] is `!Send`, so handles never hold it directly;
//! they hold an id and look it up here on the owning thread. When the thread
//! exits, every interpreter still in its table is deleted.
//!
//! Handles of children created by scripts have no host owner, so the table
//! also keeps them alive until their interpreter is deleted.

use crate::handle::Interpreter;
use std::cell::RefCell;
use std::collections::HashMap;
use tkbridge_tcl::Interp;

#[derive(Default)]
struct Slots {
    interps: RefCell<HashMap<u64, Interp>>,
    pinned: RefCell<HashMap<u64, Interpreter>>,
}

impl Drop for Slots {
    fn drop(&mut self) {
        let orphans = std::mem::take(&mut *self.interps.borrow_mut());
        for (_, interp) in orphans {
            interp.delete();
        }
        // Deleted by now, so dropping them releases nothing.
        let pinned = std::mem::take(&mut *self.pinned.borrow_mut());
        drop(pinned);
    }
}

thread_local! {
    static SLOTS: Slots = Slots::default();
}

pub(crate) fn insert(id: u64, interp: Interp) {
    SLOTS.with(|slots| {
        slots.interps.borrow_mut().insert(id, interp);
    });
}

/// The interpreter for `id`, if this thread owns it and it is still alive.
pub(crate) fn get(id: u64) -> Option<Interp> {
    SLOTS
        .try_with(|slots| slots.interps.borrow().get(&id).cloned())
        .ok()
        .flatten()
}

pub(crate) fn take(id: u64) -> Option<Interp> {
    SLOTS
        .try_with(|slots| slots.interps.borrow_mut().remove(&id))
        .ok()
        .flatten()
}

/// Id under which `interp` is stored on this thread.
pub(crate) fn id_of(interp: &Interp) -> Option<u64> {
    SLOTS
        .try_with(|slots| {
            slots
                .interps
                .borrow()
                .iter()
                .find(|(_, stored)| stored.ptr_eq(interp))
                .map(|(id, _)| *id)
        })
        .ok()
        .flatten()
}

/// Keep `handle` alive until [`unpin`] is called for its id.
pub(crate) fn pin(handle: Interpreter) {
    SLOTS.with(|slots| {
        slots.pinned.borrow_mut().insert(handle.id(), handle);
    });
}

/// Release a pinned handle. The caller drops it, outside the table borrow.
pub(crate) fn unpin(id: u64) -> Option<Interpreter> {
    SLOTS
        .try_with(|slots| slots.pinned.borrow_mut().remove(&id))
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_exit_deletes_orphans() {
        tkbridge_tcl::initialize();
        let deleted = std::thread::spawn(|| {
            let interp = Interp::new().unwrap();
            let flag = std::rc::Rc::new(std::cell::Cell::new(false));
            let seen = flag.clone();
            interp.call_when_deleted(move |_| seen.set(true));
            insert(u64::MAX, interp);
            assert!(get(u64::MAX).is_some());
            // Run the table's destructor early to observe the callback.
            let orphans = SLOTS.with(|s| std::mem::take(&mut *s.interps.borrow_mut()));
            drop(Slots {
                interps: RefCell::new(orphans),
                pinned: RefCell::default(),
            });
            flag.get()
        })
        .join()
        .unwrap();
        assert!(deleted);
    }

    #[test]
    fn test_take_removes() {
        tkbridge_tcl::initialize();
        insert(u64::MAX - 1, Interp::new().unwrap());
        assert!(take(u64::MAX - 1).is_some());
        assert!(get(u64::MAX - 1).is_none());
    }

    #[test]
    fn test_id_of_finds_stored_interp() {
        tkbridge_tcl::initialize();
        let interp = Interp::new().unwrap();
        insert(u64::MAX - 2, interp.clone());
        assert_eq!(id_of(&interp), Some(u64::MAX - 2));
        take(u64::MAX - 2);
        assert_eq!(id_of(&interp), None);
        assert!(unpin(u64::MAX - 2).is_none());
    }
}
