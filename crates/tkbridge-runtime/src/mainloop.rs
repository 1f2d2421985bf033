//! Cooperative driver for the foreign event loop.
//!
//! The driver services one event at a time until a termination predicate
//! holds. With a non-zero timer interval a self-rearming keepalive timer
//! bounds every blocking wait, and the thread yields once per iteration so
//! host threads polling shared state get a turn.

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::signal::{FatalSignal, catch_fatal};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tkbridge_tcl::notifier::{self, EventFlags, TimerToken};
use tracing::{debug, info_span};

/// Where a [`MainLoop`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    /// Predicate satisfied; serving already-queued events without blocking.
    Draining,
    Stopped,
}

pub struct MainLoop {
    interval_ms: Arc<AtomicU32>,
    bridge: Arc<Bridge>,
    state: Cell<LoopState>,
}

impl MainLoop {
    pub fn new(interval_ms: Arc<AtomicU32>, bridge: Arc<Bridge>) -> Self {
        Self {
            interval_ms,
            bridge,
            state: Cell::new(LoopState::Idle),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Run until `done` returns `true`.
    ///
    /// Returns `Err(Fatal(..))` if an interrupt is raised or a fatal signal
    /// unwinds out of an event. Ordinary command failures never end the
    /// loop.
    pub fn run(&self, mut done: impl FnMut() -> bool) -> BridgeResult<()> {
        let _span = info_span!(
            "main_loop",
            interval_ms = self.interval_ms.load(Ordering::Relaxed)
        )
        .entered();
        self.state.set(LoopState::Running);
        debug!("loop running");

        let keepalive = Keepalive::new(self.interval_ms.clone());
        let result = catch_fatal(|| {
            while !done() {
                if self.bridge.is_interrupted() {
                    return Err(BridgeError::Fatal(FatalSignal::Interrupt));
                }
                keepalive.ensure_armed();
                notifier::do_one_event(EventFlags::ALL);
                if self.interval_ms.load(Ordering::Relaxed) > 0 {
                    std::thread::yield_now();
                }
            }
            Ok(())
        });
        keepalive.stop();

        let result = result.and_then(|()| {
            self.state.set(LoopState::Draining);
            catch_fatal(|| {
                let mut served = 0usize;
                while notifier::do_one_event(
                    EventFlags::WINDOW | EventFlags::FILE | EventFlags::DONT_WAIT,
                ) {
                    served += 1;
                }
                debug!(served, "loop drained");
                Ok(())
            })
        });

        self.state.set(LoopState::Stopped);
        debug!(ok = result.is_ok(), "loop stopped");
        result
    }
}

/// Self-rearming timer that wakes the loop every interval.
struct Keepalive(Rc<KeepaliveState>);

struct KeepaliveState {
    interval_ms: Arc<AtomicU32>,
    token: Cell<Option<TimerToken>>,
    active: Cell<bool>,
}

impl Keepalive {
    fn new(interval_ms: Arc<AtomicU32>) -> Self {
        Self(Rc::new(KeepaliveState {
            interval_ms,
            token: Cell::new(None),
            active: Cell::new(true),
        }))
    }

    /// Arm the timer if none is pending. Picks up interval changes made
    /// while the loop runs.
    fn ensure_armed(&self) {
        let token = self.0.token.get();
        if token.is_none() {
            Self::arm(&self.0);
        }
    }

    fn arm(state: &Rc<KeepaliveState>) {
        let ms = state.interval_ms.load(Ordering::Relaxed);
        if !state.active.get() || ms == 0 {
            state.token.set(None);
            return;
        }
        let next = state.clone();
        let token = notifier::create_timer_handler(Duration::from_millis(u64::from(ms)), move || {
            next.token.set(None);
            Self::arm(&next);
        });
        state.token.set(Some(token));
    }

    fn stop(&self) {
        self.0.active.set(false);
        if let Some(token) = self.0.token.take() {
            notifier::delete_timer_handler(token);
        }
    }
}

/// Service one event on the current thread. Returns whether a handler ran.
pub fn process_one_event(flags: EventFlags) -> BridgeResult<bool> {
    catch_fatal(|| Ok(notifier::do_one_event(flags)))
}
