//! The process-wide bridge state.
//!
//! A [`Bridge`] bootstraps the foreign runtime exactly once, owns the
//! [`InstanceRegistry`], and carries the interrupt and global-loop flags.
//! Most programs use the lazily created [`Bridge::global`]; tests and
//! embedders that want isolated bookkeeping create their own with
//! [`Bridge::new`] and pass it to
//! [`Interpreter::create_in`](crate::Interpreter::create_in).

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::mainloop::MainLoop;
use crate::registry::InstanceRegistry;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once, OnceLock};
use tkbridge_tcl::notifier;
use tracing::{debug, info};

static GLOBAL: OnceLock<Arc<Bridge>> = OnceLock::new();

#[derive(Debug)]
pub struct Bridge {
    bootstrap: Once,
    instances: InstanceRegistry,
    global_timer_ms: Arc<AtomicU32>,
    interrupted: AtomicBool,
    pub(crate) global_stop: AtomicBool,
    next_handle_id: AtomicU64,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            bootstrap: Once::new(),
            instances: InstanceRegistry::new(),
            global_timer_ms: Arc::new(AtomicU32::new(config.global_timer_interval_ms)),
            interrupted: AtomicBool::new(false),
            global_stop: AtomicBool::new(false),
            next_handle_id: AtomicU64::new(1),
        })
    }

    /// The process-wide bridge, created with default settings on first use.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(BridgeConfig::default()))
            .clone()
    }

    /// Install the process-wide bridge with `config`. Fails if it already
    /// exists.
    pub fn install_global(config: BridgeConfig) -> BridgeResult<Arc<Self>> {
        let bridge = Self::new(config);
        GLOBAL.set(bridge.clone()).map_err(|_| {
            BridgeError::Initialization("global bridge already installed".to_string())
        })?;
        Ok(bridge)
    }

    /// Initialize the foreign runtime. Runs once per bridge; the runtime's
    /// own initialization is idempotent across bridges.
    pub(crate) fn bootstrap(&self) {
        self.bootstrap.call_once(|| {
            tkbridge_tcl::initialize();
            info!(
                patchlevel = tkbridge_tcl::PATCH_LEVEL,
                "bridge bootstrapped"
            );
        });
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    pub(crate) fn next_handle_id(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Raise the interrupt flag. Every running loop and blocking wait
    /// returns [`FatalSignal::Interrupt`](crate::FatalSignal::Interrupt)
    /// until [`clear_interrupt`](Self::clear_interrupt) is called.
    pub fn interrupt(&self) {
        debug!("interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
        notifier::alert_all();
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Ask a [`run_global_loop(false)`](Self::run_global_loop) to return.
    pub fn stop_global_loop(&self) {
        self.global_stop.store(true, Ordering::SeqCst);
        notifier::alert_all();
    }

    /// Drive the current thread's event loop with the process-wide timer
    /// interval.
    ///
    /// With `terminate_when_idle` the loop returns once no timer, idle
    /// handler or thread event is pending. Otherwise it runs until
    /// [`stop_global_loop`](Self::stop_global_loop) or an interrupt.
    pub fn run_global_loop(self: &Arc<Self>, terminate_when_idle: bool) -> BridgeResult<()> {
        self.bootstrap();
        if terminate_when_idle {
            MainLoop::new(Arc::new(AtomicU32::new(0)), self.clone())
                .run(|| !notifier::has_pending_events())
        } else {
            MainLoop::new(self.global_timer_ms.clone(), self.clone())
                .run(|| self.global_stop.swap(false, Ordering::SeqCst))
        }
    }

    pub fn timer_interval_ms(&self) -> u32 {
        self.global_timer_ms.load(Ordering::Relaxed)
    }

    pub fn set_timer_interval_ms(&self, ms: u32) {
        self.global_timer_ms.store(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_flag() {
        let bridge = Bridge::new(BridgeConfig::default());
        assert!(!bridge.is_interrupted());
        bridge.interrupt();
        assert!(bridge.is_interrupted());
        bridge.clear_interrupt();
        assert!(!bridge.is_interrupted());
    }

    #[test]
    fn test_handle_ids_start_at_one() {
        let bridge = Bridge::new(BridgeConfig::default());
        assert_eq!(bridge.next_handle_id(), 1);
        assert_eq!(bridge.next_handle_id(), 2);
    }

    #[test]
    fn test_timer_interval() {
        let bridge = Bridge::new(BridgeConfig {
            global_timer_interval_ms: 20,
        });
        assert_eq!(bridge.timer_interval_ms(), 20);
        bridge.set_timer_interval_ms(0);
        assert_eq!(bridge.timer_interval_ms(), 0);
    }

    #[test]
    fn test_idle_global_loop_returns() {
        let bridge = Bridge::new(BridgeConfig::default());
        std::thread::spawn(move || bridge.run_global_loop(true))
            .join()
            .unwrap()
            .unwrap();
    }
}
