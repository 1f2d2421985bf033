//! Dedicated owning threads.
//!
//! [`InterpreterThread`] spawns a thread that creates an interpreter, hands
//! its handle back, and services the interpreter's events until shut down.
//! Programs that have no natural "main" thread for the interpreter use this
//! and talk to it only through the handle.

use crate::bridge::Bridge;
use crate::config::InterpreterConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Interpreter;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info_span};

static NEXT_THREAD: AtomicUsize = AtomicUsize::new(0);

/// An interpreter running on its own thread.
pub struct InterpreterThread {
    handle: Interpreter,
    thread: Option<JoinHandle<BridgeResult<()>>>,
}

impl InterpreterThread {
    /// Spawn an owning thread tracked by the process-wide bridge.
    pub fn spawn(config: InterpreterConfig) -> BridgeResult<Self> {
        Self::spawn_in(&Bridge::global(), config)
    }

    pub fn spawn_in(bridge: &Arc<Bridge>, config: InterpreterConfig) -> BridgeResult<Self> {
        let (tx, rx) = bounded(1);
        let bridge = bridge.clone();
        let n = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);

        let thread = std::thread::Builder::new()
            .name(format!("tkbridge-interp-{}", n))
            .spawn(move || {
                let interp = match Interpreter::create_in(&bridge, config) {
                    Ok(interp) => interp,
                    Err(e) => {
                        let _ = tx.send(Err(e.clone()));
                        return Err(e);
                    }
                };
                let _ = tx.send(Ok(interp.clone()));
                drop(tx);

                let _span = info_span!("interp_thread", id = interp.id()).entered();
                debug!("owning thread running");
                let result = interp.run_loop();
                interp.delete();
                debug!(ok = result.is_ok(), "owning thread finished");
                result
            })
            .map_err(|e| {
                BridgeError::Initialization(format!("Failed to spawn interpreter thread: {}", e))
            })?;

        let handle = rx.recv().map_err(|_| BridgeError::OwnerGone)??;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Handle to the interpreter; clone it to share with other threads.
    pub fn handle(&self) -> &Interpreter {
        &self.handle
    }

    /// Stop the loop, delete the interpreter and join the thread. Returns
    /// how the loop ended.
    pub fn shutdown(mut self) -> BridgeResult<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> BridgeResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.handle.stop_loop();
        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(BridgeError::eval("interpreter thread panicked")),
        }
    }
}

impl Drop for InterpreterThread {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}
