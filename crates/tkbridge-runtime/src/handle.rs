//! Thread-safe handle to one foreign interpreter.
//!
//! An [`Interpreter`] can be cloned and sent anywhere. The foreign
//! interpreter itself never leaves the thread that created it: it sits in
//! that thread's slot table and every operation from another thread goes
//! through the handle's dispatcher.
//!
//! # Lifecycle
//!
//! A handle becomes deleted, exactly once, when any of these happen:
//! [`Interpreter::delete`], a script deleting the interpreter (`interp
//! delete`, or deletion of its parent), or the owning thread exiting. After
//! that every operation except the accessors fails with
//! [`BridgeError::Deleted`]. Dropping the last clone of a live handle
//! releases the foreign interpreter on its owning thread.

use crate::bridge::Bridge;
use crate::callback::{CALLBACK_COMMAND, CallbackRegistry};
use crate::config::InterpreterConfig;
use crate::dispatch::{Command, DispatchStatsSnapshot, Dispatcher, QueuedCommand, ResultEnvelope};
use crate::error::{BridgeError, BridgeResult};
use crate::local;
use crate::mainloop::MainLoop;
use crate::signal::{self, CallbackScope, IntoOutcome, Outcome};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::ThreadId;
use tkbridge_tcl::notifier::{self, ThreadEvent};
use tkbridge_tcl::{Exception, Interp};
use tracing::debug;

/// Name of the integration command that hands code to the host evaluator.
pub const HOST_EVAL_COMMAND: &str = "host_eval";

type HostEvaluator = Arc<dyn Fn(&str) -> Outcome + Send + Sync>;

pub(crate) struct HandleShared {
    pub(crate) id: u64,
    pub(crate) owner: ThreadId,
    name: String,
    safe: bool,
    deleted: AtomicBool,
    timer_ms: Arc<AtomicU32>,
    callbacks: Arc<CallbackRegistry>,
    host_evaluator: Arc<RwLock<Option<HostEvaluator>>>,
    pub(crate) dispatcher: Dispatcher,
    stop_requested: AtomicBool,
    pub(crate) config: InterpreterConfig,
    pub(crate) bridge: Arc<Bridge>,
}

impl HandleShared {
    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Flip to deleted. Only the first call does anything: it unregisters
    /// the handle, answers queued commands and drops the host closures.
    fn mark_deleted(&self) -> bool {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.bridge.instances().unregister(self.id);
        let drained = self.dispatcher.drain_with(BridgeError::Deleted);
        // Closures may hold clones of this handle.
        self.callbacks.clear();
        self.host_evaluator.write().take();
        debug!(id = self.id, drained, "interpreter handle deleted");
        true
    }

    fn post(&self, event: ThreadEvent) {
        let posted = notifier::thread_queue_event(self.owner, event)
            .and_then(|()| notifier::thread_alert(self.owner));
        if let Err(e) = posted {
            debug!(id = self.id, error = %e, "owning thread already gone");
        }
    }
}

impl Drop for HandleShared {
    fn drop(&mut self) {
        if self.is_deleted() {
            return;
        }
        self.bridge.instances().unregister(self.id);
        let id = self.id;
        let pending = self.dispatcher.take_pending();
        if std::thread::current().id() == self.owner {
            release(id, pending);
        } else {
            self.post(Box::new(move || release(id, pending)));
        }
    }
}

/// Serve whatever was still queued, then delete the foreign interpreter.
fn release(id: u64, pending: Vec<QueuedCommand>) {
    crate::dispatch::serve_detached(id, pending);
    if let Some(interp) = local::take(id) {
        delete_interp(interp);
    }
}

fn delete_interp(interp: Interp) {
    // A command is still running in it; finish that first.
    if interp.is_busy() {
        notifier::do_when_idle(move || interp.delete());
    } else {
        interp.delete();
    }
}

/// Thread-safe, cloneable handle to a foreign interpreter.
///
/// # Example
///
/// ```
/// use tkbridge_runtime::{Interpreter, InterpreterConfig};
///
/// let interp = Interpreter::create(InterpreterConfig::default()).unwrap();
/// assert_eq!(interp.evaluate("set x 5; return $x").unwrap(), "5");
///
/// let id = interp.register_callback(|args: &[String]| args.len()).unwrap();
/// assert_eq!(interp.evaluate(&format!("host_callback {} a b", id)).unwrap(), "2");
/// interp.delete();
/// ```
#[derive(Clone)]
pub struct Interpreter {
    pub(crate) shared: Arc<HandleShared>,
}

impl Interpreter {
    /// Create an interpreter owned by the calling thread, using the
    /// process-wide bridge.
    pub fn create(config: InterpreterConfig) -> BridgeResult<Self> {
        Self::create_in(&Bridge::global(), config)
    }

    /// Create an interpreter owned by the calling thread, tracked by
    /// `bridge`.
    pub fn create_in(bridge: &Arc<Bridge>, config: InterpreterConfig) -> BridgeResult<Self> {
        bridge.bootstrap();
        let interp = if config.safe {
            Interp::new_safe()?
        } else {
            Interp::new()?
        };
        Ok(Self::adopt(bridge, interp, config))
    }

    /// Wrap a foreign interpreter created on the current thread.
    fn adopt(bridge: &Arc<Bridge>, interp: Interp, config: InterpreterConfig) -> Self {
        let id = bridge.next_handle_id();
        let callbacks = Arc::new(CallbackRegistry::new());
        let host_evaluator: Arc<RwLock<Option<HostEvaluator>>> = Arc::new(RwLock::new(None));
        let shared = Arc::new(HandleShared {
            id,
            owner: notifier::current_thread(),
            name: interp.name().to_string(),
            safe: interp.is_safe(),
            deleted: AtomicBool::new(false),
            timer_ms: Arc::new(AtomicU32::new(config.timer_interval_ms)),
            callbacks: callbacks.clone(),
            host_evaluator: host_evaluator.clone(),
            dispatcher: Dispatcher::new(),
            stop_requested: AtomicBool::new(false),
            config,
            bridge: bridge.clone(),
        });

        interp.create_command(CALLBACK_COMMAND, move |_, args| {
            let Some(id) = args.get(1) else {
                return Err(Exception::wrong_args("host_callback id ?arg ...?"));
            };
            match callbacks.dispatch(id, &args[2..]) {
                Ok(outcome) => signal::to_foreign(outcome),
                Err(e) => Err(Exception::error(e.to_string())),
            }
        });

        interp.create_command(HOST_EVAL_COMMAND, move |_, args| {
            if args.len() != 2 {
                return Err(Exception::wrong_args("host_eval code"));
            }
            let evaluator = host_evaluator.read().clone();
            let Some(evaluator) = evaluator else {
                return Err(Exception::error("no host evaluator installed"));
            };
            let _scope = CallbackScope::enter();
            signal::to_foreign(signal::protect(|| evaluator(&args[1])))
        });

        // Every child gets a handle, including those made by `interp create`.
        // Those are pinned on this thread until their interpreter goes away.
        let child_bridge = bridge.clone();
        let child_config = shared.config.clone();
        interp.call_when_child_created(move |child| {
            let config = child_config.clone().safe(child.is_safe());
            local::pin(Interpreter::adopt(&child_bridge, child.clone(), config));
        });

        let weak = Arc::downgrade(&shared);
        let tracker = bridge.clone();
        interp.call_when_deleted(move |_| {
            local::take(id);
            tracker.instances().unregister(id);
            if let Some(shared) = weak.upgrade() {
                shared.mark_deleted();
            }
            drop(local::unpin(id));
        });

        local::insert(id, interp);
        bridge.instances().register(&shared);
        debug!(
            id,
            name = %shared.name,
            safe = shared.safe,
            "interpreter handle created"
        );
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<HandleShared>) -> Self {
        Self { shared }
    }

    /// Process-unique id of this handle.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name within the parent interpreter; empty for a top-level one.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_safe(&self) -> bool {
        self.shared.safe
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.is_deleted()
    }

    /// Thread that created the interpreter and is the only one to touch it.
    pub fn owner(&self) -> ThreadId {
        self.shared.owner
    }

    pub fn on_owning_thread(&self) -> bool {
        std::thread::current().id() == self.shared.owner
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.shared.bridge
    }

    /// Delete the interpreter. Safe to call from any thread and more than
    /// once. From another thread the handle is marked deleted at once and
    /// the foreign interpreter is released when its owner next services
    /// events.
    pub fn delete(&self) {
        let shared = &self.shared;
        if shared.is_deleted() {
            return;
        }
        if self.on_owning_thread() {
            if let Some(interp) = local::take(shared.id) {
                delete_interp(interp);
            }
            shared.mark_deleted();
        } else if shared.mark_deleted() {
            let id = shared.id;
            shared.post(Box::new(move || {
                if let Some(interp) = local::take(id) {
                    delete_interp(interp);
                }
            }));
        }
    }

    // --- evaluation -------------------------------------------------------

    /// Evaluate `script` and return its result.
    pub fn evaluate(&self, script: &str) -> BridgeResult<String> {
        self.run_waiting(Command::Eval(script.to_string()))
    }

    /// Evaluate `script` and report its completion as an [`Outcome`], so
    /// `break`, `continue` and `return` are visible to the caller.
    pub fn evaluate_outcome(&self, script: &str) -> BridgeResult<Outcome> {
        let script = script.to_string();
        self.call_on_owner(move |interp| Ok(signal::from_foreign(interp.eval_raw(&script))))
    }

    /// Invoke one command with pre-split words. No substitution happens, so
    /// words may contain any characters.
    pub fn invoke<S: AsRef<str>>(&self, words: &[S]) -> BridgeResult<String> {
        if words.is_empty() {
            return Err(BridgeError::invalid_argument(
                "invoke requires at least one word",
            ));
        }
        let words = words.iter().map(|w| w.as_ref().to_string()).collect();
        self.run_waiting(Command::Invoke(words))
    }

    pub async fn evaluate_async(&self, script: &str) -> BridgeResult<String> {
        let envelope = self
            .enqueue_async(Command::Eval(script.to_string()))
            .await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    pub async fn invoke_async(&self, words: Vec<String>) -> BridgeResult<String> {
        if words.is_empty() {
            return Err(BridgeError::invalid_argument(
                "invoke requires at least one word",
            ));
        }
        let envelope = self.enqueue_async(Command::Invoke(words)).await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    fn run_waiting(&self, command: Command) -> BridgeResult<String> {
        match self.enqueue(command, true)? {
            Some(envelope) => Ok(envelope.into_result()?.unwrap_or_default()),
            None => Ok(String::new()),
        }
    }

    /// Run `f` with the foreign interpreter on the owning thread and wait for
    /// its result.
    pub fn call_on_owner<T, F>(&self, f: F) -> BridgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Interp) -> BridgeResult<T> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let out = slot.clone();
        let command = Command::RunClosure(Box::new(move |interp| {
            *out.lock() = Some(f(interp)?);
            Ok(None)
        }));
        if let Some(envelope) = self.enqueue(command, true)? {
            envelope.into_result()?;
        }
        slot.lock().take().ok_or(BridgeError::Deleted)
    }

    /// Run `f` on the owning thread without waiting. On the owning thread it
    /// runs immediately.
    pub fn queue_for_main(&self, f: impl FnOnce() + Send + 'static) -> BridgeResult<()> {
        let command = Command::RunClosure(Box::new(move |_| {
            f();
            Ok(None)
        }));
        self.enqueue(command, false).map(|_| ())
    }

    // --- variables --------------------------------------------------------

    /// Value of a global variable, `None` if it does not exist.
    pub fn get_variable(&self, name: &str) -> BridgeResult<Option<String>> {
        let name = name.to_string();
        self.call_on_owner(move |interp| Ok(interp.get_var(&name)))
    }

    /// Set a global variable and return the stored value.
    pub fn set_variable(&self, name: &str, value: &str) -> BridgeResult<String> {
        let (name, value) = (name.to_string(), value.to_string());
        self.call_on_owner(move |interp| Ok(interp.set_var(&name, &value)?))
    }

    /// Remove a global variable. Returns whether it existed.
    pub fn unset_variable(&self, name: &str) -> BridgeResult<bool> {
        let name = name.to_string();
        self.call_on_owner(move |interp| Ok(interp.unset_var(&name)))
    }

    /// Full version string of the foreign runtime, read from the
    /// interpreter's `tcl_patchLevel` variable.
    pub fn runtime_patchlevel(&self) -> BridgeResult<String> {
        Ok(self.get_variable("tcl_patchLevel")?.unwrap_or_default())
    }

    // --- callbacks --------------------------------------------------------

    /// Register a host closure and return the id scripts use with
    /// `host_callback <id> ?arg ...?`.
    pub fn register_callback<F, R>(&self, callback: F) -> BridgeResult<String>
    where
        F: Fn(&[String]) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.check_live()?;
        Ok(self.shared.callbacks.register(callback))
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn unregister_callback(&self, id: &str) -> BridgeResult<()> {
        self.check_live()?;
        self.shared.callbacks.unregister(id);
        Ok(())
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    /// Install the closure behind the `host_eval <code>` command, replacing
    /// any previous one.
    pub fn set_host_evaluator<F, R>(&self, evaluator: F) -> BridgeResult<()>
    where
        F: Fn(&str) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.check_live()?;
        let evaluator: HostEvaluator = Arc::new(move |code: &str| evaluator(code).into_outcome());
        *self.shared.host_evaluator.write() = Some(evaluator);
        Ok(())
    }

    // --- children ---------------------------------------------------------

    /// Create a child interpreter with its own handle, callbacks and queue.
    /// A safe parent only creates safe children.
    ///
    /// Unlike children created by scripts, the returned handle owns the
    /// child: dropping its last clone releases it.
    pub fn create_child(&self, name: &str, safe: bool) -> BridgeResult<Interpreter> {
        let name = name.to_string();
        self.call_on_owner(move |interp| {
            let child = interp.create_child(&name, safe)?;
            local::id_of(&child)
                .and_then(local::unpin)
                .ok_or(BridgeError::Deleted)
        })
    }

    // --- event loop -------------------------------------------------------

    pub fn timer_interval_ms(&self) -> u32 {
        self.shared.timer_ms.load(Ordering::Relaxed)
    }

    /// Change the keepalive period. A running loop picks it up when the
    /// current timer fires.
    pub fn set_timer_interval_ms(&self, ms: u32) {
        self.shared.timer_ms.store(ms, Ordering::Relaxed);
    }

    /// Service events on the owning thread until the interpreter is deleted
    /// or [`stop_loop`](Self::stop_loop) is called.
    pub fn run_loop(&self) -> BridgeResult<()> {
        if !self.on_owning_thread() {
            return Err(BridgeError::invalid_argument(
                "run_loop must be called on the owning thread",
            ));
        }
        self.check_live()?;
        let shared = &self.shared;
        MainLoop::new(shared.timer_ms.clone(), shared.bridge.clone()).run(|| {
            shared.is_deleted() || shared.stop_requested.swap(false, Ordering::SeqCst)
        })
    }

    /// Ask a running (or the next) [`run_loop`](Self::run_loop) to return.
    /// Callable from any thread.
    pub fn stop_loop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        // Nothing to wake if the owner already exited.
        let _ = notifier::thread_alert(self.shared.owner);
    }

    // --- diagnostics ------------------------------------------------------

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.shared.dispatcher.stats().snapshot()
    }

    /// Commands queued for the owning thread and not picked up yet.
    pub fn pending_commands(&self) -> usize {
        self.shared.dispatcher.pending()
    }

    // --- list helpers -----------------------------------------------------

    /// Split a foreign list into its elements.
    pub fn split_list(text: &str) -> BridgeResult<Vec<String>> {
        Ok(tkbridge_tcl::split_list(text)?)
    }

    /// Build a foreign list that splits back into `words`.
    pub fn merge_list<S: AsRef<str>>(words: &[S]) -> String {
        tkbridge_tcl::merge_list(words)
    }

    fn check_live(&self) -> BridgeResult<()> {
        if self.is_deleted() {
            Err(BridgeError::Deleted)
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Interpreter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Interpreter {}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("safe", &self.shared.safe)
            .field("deleted", &self.is_deleted())
            .field("owner", &self.shared.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn fresh() -> (Arc<Bridge>, Interpreter) {
        let bridge = Bridge::new(BridgeConfig::default());
        let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
        (bridge, interp)
    }

    #[test]
    fn test_evaluate_on_owner() {
        let (_, interp) = fresh();
        assert!(interp.on_owning_thread());
        assert_eq!(interp.evaluate("set x 5; return $x").unwrap(), "5");
        assert_eq!(interp.get_variable("x").unwrap().as_deref(), Some("5"));
        assert_eq!(interp.get_variable("missing").unwrap(), None);
    }

    #[test]
    fn test_invoke_needs_words() {
        let (_, interp) = fresh();
        let none: [&str; 0] = [];
        assert!(matches!(
            interp.invoke(&none),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert_eq!(interp.invoke(&["set", "y", "a b [c]"]).unwrap(), "a b [c]");
    }

    #[test]
    fn test_eval_error_keeps_message() {
        let (_, interp) = fresh();
        assert_eq!(
            interp.evaluate("error boom"),
            Err(BridgeError::eval("boom"))
        );
        assert_eq!(interp.stats().failed, 1);
    }

    #[test]
    fn test_evaluate_outcome_reports_control_codes() {
        let (_, interp) = fresh();
        assert_eq!(interp.evaluate_outcome("break").unwrap(), Outcome::Break);
        assert_eq!(
            interp.evaluate_outcome("return -code error oops").unwrap(),
            Outcome::Error("oops".into())
        );
        assert_eq!(
            interp.evaluate_outcome("set a 1; return done").unwrap(),
            Outcome::Return(Some("done".into()))
        );
        // Plain evaluation folds stray codes like any top-level script.
        assert_eq!(
            interp.evaluate("break"),
            Err(BridgeError::eval("invoked \"break\" outside of a loop"))
        );
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (bridge, interp) = fresh();
        assert_eq!(bridge.instances().count(), 1);
        interp.delete();
        interp.delete();
        assert!(interp.is_deleted());
        assert_eq!(bridge.instances().count(), 0);
        assert_eq!(interp.evaluate("set x 1"), Err(BridgeError::Deleted));
        assert_eq!(interp.get_variable("x"), Err(BridgeError::Deleted));
        assert!(matches!(
            interp.register_callback(|_: &[String]| ()),
            Err(BridgeError::Deleted)
        ));
    }

    #[test]
    fn test_drop_releases_interpreter() {
        let (bridge, interp) = fresh();
        let id = interp.id();
        drop(interp);
        assert!(local::get(id).is_none());
        assert!(!bridge.instances().contains(id));
    }

    #[test]
    fn test_host_eval() {
        let (_, interp) = fresh();
        assert_eq!(
            interp.evaluate("host_eval {1 + 1}"),
            Err(BridgeError::eval("no host evaluator installed"))
        );
        interp
            .set_host_evaluator(|code: &str| format!("host saw {}", code))
            .unwrap();
        assert_eq!(
            interp.evaluate("host_eval {1 + 1}").unwrap(),
            "host saw 1 + 1"
        );
    }

    #[test]
    fn test_unknown_callback_from_script() {
        let (_, interp) = fresh();
        assert_eq!(
            interp.evaluate("host_callback cb42"),
            Err(BridgeError::eval("Unknown callback id: cb42"))
        );
        assert_eq!(
            interp.evaluate("host_callback"),
            Err(BridgeError::eval(
                "wrong # args: should be \"host_callback id ?arg ...?\""
            ))
        );
    }

    #[test]
    fn test_callback_return_reaches_proc() {
        let (_, interp) = fresh();
        let id = interp
            .register_callback(|_: &[String]| Outcome::Return(Some("early".into())))
            .unwrap();
        let script = format!(
            "proc p {{}} {{ {}; return late }}; p",
            CallbackRegistry::callback_command(&id)
        );
        assert_eq!(interp.evaluate(&script).unwrap(), "early");
    }

    #[test]
    fn test_run_loop_requires_owner() {
        let (_, interp) = fresh();
        let remote = interp.clone();
        let err = std::thread::spawn(move || remote.run_loop())
            .join()
            .unwrap();
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn test_stop_before_run_is_kept() {
        let (_, interp) = fresh();
        interp.stop_loop();
        interp.run_loop().unwrap();
    }

    #[test]
    fn test_list_helpers() {
        let words = ["a", "b c", "{"];
        let list = Interpreter::merge_list(&words);
        assert_eq!(Interpreter::split_list(&list).unwrap(), words);
    }

    #[test]
    fn test_runtime_patchlevel() {
        let (_, interp) = fresh();
        assert_eq!(interp.runtime_patchlevel().unwrap(), tkbridge_tcl::PATCH_LEVEL);
    }
}
