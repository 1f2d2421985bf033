//! Per-thread event notifier.
//!
//! Every thread that creates an interpreter owns one notifier. It holds three
//! kinds of pending work:
//!
//! - **thread events**: `Send` closures queued by *other* threads with
//!   [`thread_queue_event`]. This is the only part of the notifier that is
//!   shared across threads.
//! - **timer handlers**: thread-local closures that fire after a delay.
//! - **idle handlers**: thread-local closures run when nothing else is pending.
//!
//! [`do_one_event`] services exactly one unit of work, blocking (unless
//! [`EventFlags::DONT_WAIT`] is given) until something arrives. A blocked
//! thread is woken by [`thread_alert`] or by the next timer deadline.

use crate::error::TclError;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::BitOr;
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::trace;

/// Which event sources [`do_one_event`] may service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const DONT_WAIT: Self = Self(1 << 1);
    pub const WINDOW: Self = Self(1 << 2);
    pub const FILE: Self = Self(1 << 3);
    pub const TIMER: Self = Self(1 << 4);
    pub const IDLE: Self = Self(1 << 5);
    pub const ALL: Self = Self(Self::WINDOW.0 | Self::FILE.0 | Self::TIMER.0 | Self::IDLE.0);

    const KNOWN: u32 = Self::DONT_WAIT.0 | Self::ALL.0;

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build flags from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::KNOWN)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for EventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Work queued onto another thread's notifier.
pub type ThreadEvent = Box<dyn FnOnce() + Send + 'static>;

type LocalHandler = Box<dyn FnOnce() + 'static>;

/// Handle returned by [`create_timer_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Handle returned by [`do_when_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleToken(u64);

#[derive(Default)]
struct SharedState {
    events: VecDeque<ThreadEvent>,
    alerted: bool,
}

struct Shared {
    state: Mutex<SharedState>,
    cond: Condvar,
}

static REGISTRY: OnceLock<DashMap<ThreadId, Arc<Shared>>> = OnceLock::new();

fn registry() -> &'static DashMap<ThreadId, Arc<Shared>> {
    REGISTRY.get_or_init(DashMap::new)
}

struct Local {
    thread: ThreadId,
    shared: Arc<Shared>,
    timers: RefCell<BTreeMap<(Instant, u64), LocalHandler>>,
    timer_deadlines: RefCell<HashMap<u64, Instant>>,
    idle: RefCell<VecDeque<(u64, LocalHandler)>>,
    next_token: Cell<u64>,
}

impl Local {
    fn new() -> Self {
        let thread = std::thread::current().id();
        let shared = Arc::new(Shared {
            state: Mutex::new(SharedState::default()),
            cond: Condvar::new(),
        });
        registry().insert(thread, shared.clone());
        trace!(?thread, "notifier registered");
        Self {
            thread,
            shared,
            timers: RefCell::new(BTreeMap::new()),
            timer_deadlines: RefCell::new(HashMap::new()),
            idle: RefCell::new(VecDeque::new()),
            next_token: Cell::new(1),
        }
    }

    fn token(&self) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        token
    }

    fn pop_event(&self) -> Option<ThreadEvent> {
        self.shared.state.lock().events.pop_front()
    }

    fn pop_expired_timer(&self, now: Instant) -> Option<LocalHandler> {
        let mut timers = self.timers.borrow_mut();
        let key = *timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.timer_deadlines.borrow_mut().remove(&key.1);
        timers.remove(&key)
    }

    fn pop_idle(&self) -> Option<LocalHandler> {
        self.idle.borrow_mut().pop_front().map(|(_, handler)| handler)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().keys().next().map(|(when, _)| *when)
    }

    fn wait(&self, deadline: Option<Instant>) {
        let mut state = self.shared.state.lock();
        if !state.events.is_empty() || std::mem::take(&mut state.alerted) {
            return;
        }
        match deadline {
            Some(deadline) => {
                if deadline > Instant::now() {
                    self.shared.cond.wait_until(&mut state, deadline);
                }
            }
            None => self.shared.cond.wait(&mut state),
        }
        state.alerted = false;
    }
}

impl Drop for Local {
    fn drop(&mut self) {
        registry().remove(&self.thread);
        // Pending events are dropped here, which disconnects any reply
        // channels they carry.
        self.shared.state.lock().events.clear();
    }
}

thread_local! {
    static LOCAL: Local = Local::new();
}

/// Identity of the current thread, registering its notifier on first use.
pub fn current_thread() -> ThreadId {
    LOCAL.with(|local| local.thread)
}

/// Whether `thread` currently has a live notifier.
pub fn is_registered(thread: ThreadId) -> bool {
    registry().contains_key(&thread)
}

/// Append an event to `thread`'s queue. The event runs on that thread the
/// next time it services events. Does not wake the thread; see
/// [`thread_alert`].
pub fn thread_queue_event(thread: ThreadId, event: ThreadEvent) -> Result<(), TclError> {
    let shared = registry()
        .get(&thread)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| TclError::NoNotifier(format!("{:?}", thread)))?;
    shared.state.lock().events.push_back(event);
    Ok(())
}

/// Wake `thread` if it is blocked in [`do_one_event`].
pub fn thread_alert(thread: ThreadId) -> Result<(), TclError> {
    let shared = registry()
        .get(&thread)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| TclError::NoNotifier(format!("{:?}", thread)))?;
    shared.state.lock().alerted = true;
    shared.cond.notify_all();
    Ok(())
}

/// Wake every thread that has a notifier.
pub fn alert_all() {
    for entry in registry().iter() {
        entry.value().state.lock().alerted = true;
        entry.value().cond.notify_all();
    }
}

/// Run `handler` on this thread once `delay` has elapsed.
pub fn create_timer_handler(delay: Duration, handler: impl FnOnce() + 'static) -> TimerToken {
    LOCAL.with(|local| {
        let token = local.token();
        let when = Instant::now() + delay;
        local
            .timers
            .borrow_mut()
            .insert((when, token), Box::new(handler));
        local.timer_deadlines.borrow_mut().insert(token, when);
        TimerToken(token)
    })
}

/// Cancel a timer handler. Returns `false` if it already fired or was
/// cancelled, or if the thread's notifier is already torn down.
pub fn delete_timer_handler(token: TimerToken) -> bool {
    LOCAL
        .try_with(|local| {
            let Some(when) = local.timer_deadlines.borrow_mut().remove(&token.0) else {
                return false;
            };
            local.timers.borrow_mut().remove(&(when, token.0)).is_some()
        })
        .unwrap_or(false)
}

/// Run `handler` on this thread the next time no other event is pending.
pub fn do_when_idle(handler: impl FnOnce() + 'static) -> IdleToken {
    LOCAL.with(|local| {
        let token = local.token();
        local
            .idle
            .borrow_mut()
            .push_back((token, Box::new(handler)));
        IdleToken(token)
    })
}

/// Cancel an idle handler that has not run yet.
pub fn cancel_idle(token: IdleToken) -> bool {
    LOCAL
        .try_with(|local| {
            let mut idle = local.idle.borrow_mut();
            let before = idle.len();
            idle.retain(|(t, _)| *t != token.0);
            idle.len() != before
        })
        .unwrap_or(false)
}

/// Number of thread events waiting on this thread.
pub fn pending_thread_events() -> usize {
    LOCAL.with(|local| local.shared.state.lock().events.len())
}

/// Whether this thread has any thread event, timer or idle handler pending.
pub fn has_pending_events() -> bool {
    LOCAL.with(|local| {
        !local.shared.state.lock().events.is_empty()
            || !local.timers.borrow().is_empty()
            || !local.idle.borrow().is_empty()
    })
}

/// Service one event on the current thread.
///
/// Thread events count as window/file events. Returns `true` if a handler
/// ran. Without [`EventFlags::DONT_WAIT`] the call blocks until work arrives,
/// the next timer is due, or the thread is alerted; an alert that brings no
/// work makes it return `false`.
pub fn do_one_event(flags: EventFlags) -> bool {
    let flags = if flags.intersects(EventFlags::ALL) {
        flags
    } else {
        flags | EventFlags::ALL
    };

    LOCAL.with(|local| {
        let mut waited = false;
        loop {
            if flags.intersects(EventFlags::WINDOW | EventFlags::FILE) {
                if let Some(event) = local.pop_event() {
                    event();
                    return true;
                }
            }
            if flags.contains(EventFlags::TIMER) {
                if let Some(handler) = local.pop_expired_timer(Instant::now()) {
                    handler();
                    return true;
                }
            }
            if flags.contains(EventFlags::IDLE) {
                if let Some(handler) = local.pop_idle() {
                    handler();
                    return true;
                }
            }
            if flags.contains(EventFlags::DONT_WAIT) || waited {
                return false;
            }
            let deadline = if flags.contains(EventFlags::TIMER) {
                local.next_deadline()
            } else {
                None
            };
            local.wait(deadline);
            waited = true;
        }
    })
}
