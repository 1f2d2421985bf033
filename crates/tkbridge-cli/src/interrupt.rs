//! Ctrl-C handling.
//!
//! The first Ctrl-C interrupts the bridge: running loops stop and blocked
//! callers return `Fatal(Interrupt)`, which `main` turns into exit status 130.
//! A second Ctrl-C exits at once, for scripts that never return to the loop.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tkbridge_runtime::Bridge;
use tracing::{debug, warn};

/// Exit status for a process ended by SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Watch for Ctrl-C on a background thread for the rest of the process.
pub fn install(bridge: Arc<Bridge>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("tkb-signal".to_string())
        .spawn(move || {
            let seen = AtomicUsize::new(0);
            runtime.block_on(async {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                        return;
                    }
                    if on_interrupt(&bridge, &seen) {
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                }
            });
        })?;
    Ok(())
}

/// Record one Ctrl-C. Returns whether the process should exit right away.
fn on_interrupt(bridge: &Bridge, seen: &AtomicUsize) -> bool {
    let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(count, "interrupt received");
    if count == 1 {
        bridge.interrupt();
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tkbridge_runtime::{BridgeConfig, BridgeError, FatalSignal};

    #[test]
    fn test_first_interrupt_stops_second_exits() {
        let bridge = Bridge::new(BridgeConfig::default());
        let seen = AtomicUsize::new(0);
        assert!(!on_interrupt(&bridge, &seen));
        assert!(bridge.is_interrupted());
        assert!(on_interrupt(&bridge, &seen));
    }

    #[test]
    fn test_interrupt_ends_running_loop() {
        let bridge = Bridge::new(BridgeConfig::default());
        let signaller = bridge.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            on_interrupt(&signaller, &AtomicUsize::new(0))
        });

        assert_eq!(
            bridge.run_global_loop(false),
            Err(BridgeError::Fatal(FatalSignal::Interrupt))
        );
        assert!(!sender.join().unwrap());
    }
}
