//! Cross-thread command dispatch.
//!
//! Any thread may hand a [`Command`] to an interpreter. On the owning thread
//! it runs in place. Elsewhere it is appended to the handle's FIFO queue and
//! the owning thread's notifier receives one wake event per command; each
//! wake event pops exactly one command, so a command leaves the queue before
//! it runs and never runs twice. Callers that asked for a result block on a
//! one-shot channel (or await one) until the [`ResultEnvelope`] arrives.
//!
//! ```text
//!  caller thread                      owning thread
//!  ─────────────                      ─────────────
//!  enqueue(cmd, wait) ─push─► queue
//!        │             ─wake event─►  do_one_event
//!        │                              pop ─► execute ─► envelope
//!        ◄──────────── reply channel ───────────────────────┘
//! ```

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{HandleShared, Interpreter};
use crate::local;
use crate::signal::{self, FatalSignal, Guarded, catch_fatal, guard};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use serde::Serialize;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tkbridge_tcl::{Code, Interp, TclResult, notifier};
use tokio::sync::oneshot;
use tracing::{info_span, trace, warn};

/// Longest a waiting caller sleeps before re-checking interrupt, deadline
/// and owner liveness.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Closure run against the foreign interpreter on its owning thread.
pub type OwnerFn = Box<dyn FnOnce(&Interp) -> BridgeResult<Option<String>> + Send + 'static>;

/// Work for the owning thread.
pub enum Command {
    /// Evaluate a script.
    Eval(String),
    /// Invoke one command with pre-split words; no substitution happens.
    Invoke(Vec<String>),
    /// Run a closure with the foreign interpreter.
    RunClosure(OwnerFn),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eval(script) => f.debug_tuple("Eval").field(script).finish(),
            Self::Invoke(words) => f.debug_tuple("Invoke").field(words).finish(),
            Self::RunClosure(_) => f.write_str("RunClosure(..)"),
        }
    }
}

/// What came back from the owning thread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultEnvelope {
    pub value: Option<String>,
    pub error: Option<BridgeError>,
}

impl ResultEnvelope {
    pub fn ok(value: Option<String>) -> Self {
        Self { value, error: None }
    }

    pub fn err(error: BridgeError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// Re-raise a carried error with its original variant.
    pub fn into_result(self) -> BridgeResult<Option<String>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}

impl From<BridgeResult<Option<String>>> for ResultEnvelope {
    fn from(result: BridgeResult<Option<String>>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(error),
        }
    }
}

pub(crate) enum Reply {
    Blocking(Sender<ResultEnvelope>),
    Async(oneshot::Sender<ResultEnvelope>),
}

impl Reply {
    fn send(self, envelope: ResultEnvelope) {
        // The waiter may have timed out and gone away.
        match self {
            Self::Blocking(tx) => {
                let _ = tx.send(envelope);
            }
            Self::Async(tx) => {
                let _ = tx.send(envelope);
            }
        }
    }
}

pub(crate) struct QueuedCommand {
    command: Command,
    reply: Option<Reply>,
}

/// Statistics about dispatch
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Commands handed to this interpreter, from any thread
    pub submitted: AtomicU64,
    /// Commands that finished, successfully or not
    pub completed: AtomicU64,
    /// Commands that finished with an error
    pub failed: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record_finished(&self, failed: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of dispatch statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

impl DispatchStatsSnapshot {
    /// Commands submitted but not finished yet.
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

/// Per-handle command queue.
pub struct Dispatcher {
    tx: Sender<QueuedCommand>,
    rx: Receiver<QueuedCommand>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            stats: DispatchStats::default(),
        }
    }

    fn push(&self, queued: QueuedCommand) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(queued);
    }

    fn pop(&self) -> Option<QueuedCommand> {
        self.rx.try_recv().ok()
    }

    /// Commands queued and not yet picked up.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Move every queued command out of the queue.
    pub(crate) fn take_pending(&self) -> Vec<QueuedCommand> {
        self.rx.try_iter().collect()
    }

    /// Answer every queued command with `error`.
    pub(crate) fn drain_with(&self, error: BridgeError) -> usize {
        let mut drained = 0;
        while let Some(queued) = self.pop() {
            self.stats.record_finished(true);
            if let Some(reply) = queued.reply {
                reply.send(ResultEnvelope::err(error.clone()));
            }
            drained += 1;
        }
        drained
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Run `command` against `interp`. Must be called on the owning thread.
pub(crate) fn execute(interp: &Interp, command: Command) -> BridgeResult<Option<String>> {
    match command {
        Command::Eval(script) => completion(interp.eval(&script)),
        Command::Invoke(words) => completion(interp.invoke(&words)),
        Command::RunClosure(f) => f(interp),
    }
}

fn completion(result: TclResult) -> BridgeResult<Option<String>> {
    match result {
        Ok(value) => Ok(Some(value)),
        // Nested evaluation inside a callback can surface `return`.
        Err(e) if e.code == Code::Return => Ok(Some(e.value)),
        Err(e) => Err(e.into()),
    }
}

/// Wake event body: serve exactly one queued command.
fn serve_one(weak: Weak<HandleShared>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let Some(QueuedCommand { command, reply }) = shared.dispatcher.pop() else {
        return;
    };
    let _span = info_span!("command", interp = shared.id).entered();
    trace!(?command, "serving queued command");

    let guarded = match local::get(shared.id) {
        Some(interp) => guard(|| execute(&interp, command), "queued command"),
        None => Guarded::Done(Err(BridgeError::Deleted)),
    };

    match guarded {
        Guarded::Done(result) => {
            shared.dispatcher.stats.record_finished(result.is_err());
            match reply {
                Some(reply) => reply.send(result.into()),
                None => {
                    if let Err(e) = result {
                        warn!(interp = shared.id, error = %e, "queued command failed");
                    }
                }
            }
        }
        Guarded::Fatal(signal, payload) => {
            shared.dispatcher.stats.record_finished(true);
            if let Some(reply) = reply {
                reply.send(ResultEnvelope::err(BridgeError::Fatal(signal)));
            }
            drop(shared);
            resume_unwind(payload);
        }
    }
}

/// Serve commands that outlived their handle, in queue order. Runs on the
/// owning thread just before the interpreter is released.
pub(crate) fn serve_detached(id: u64, pending: Vec<QueuedCommand>) {
    if pending.is_empty() {
        return;
    }
    let _span = info_span!("command", interp = id).entered();
    trace!(count = pending.len(), "serving commands of a dropped handle");
    for QueuedCommand { command, reply } in pending {
        let guarded = match local::get(id) {
            Some(interp) => guard(|| execute(&interp, command), "queued command"),
            None => Guarded::Done(Err(BridgeError::Deleted)),
        };
        match guarded {
            Guarded::Done(result) => match reply {
                Some(reply) => reply.send(result.into()),
                None => {
                    if let Err(e) = result {
                        warn!(interp = id, error = %e, "queued command failed");
                    }
                }
            },
            Guarded::Fatal(signal, payload) => {
                if let Some(reply) = reply {
                    reply.send(ResultEnvelope::err(BridgeError::Fatal(signal)));
                }
                resume_unwind(payload);
            }
        }
    }
}

impl Interpreter {
    /// Hand `command` to the owning thread.
    ///
    /// On the owning thread the command runs immediately. Elsewhere it is
    /// queued; with `wait` the call blocks until the envelope arrives,
    /// without it the call returns `Ok(None)` at once and failures are
    /// logged on the owning thread.
    pub fn enqueue(&self, command: Command, wait: bool) -> BridgeResult<Option<ResultEnvelope>> {
        if self.shared.is_deleted() {
            return Err(BridgeError::Deleted);
        }
        if self.on_owning_thread() {
            let envelope = self.execute_here(command);
            if !wait {
                if let Some(e) = &envelope.error {
                    warn!(interp = self.shared.id, error = %e, "command failed");
                }
            }
            return Ok(wait.then_some(envelope));
        }
        if !wait {
            signal::escalate(self.submit(command, None))?;
            return Ok(None);
        }
        let (tx, rx) = bounded(1);
        signal::escalate(self.submit(command, Some(Reply::Blocking(tx))))?;
        let envelope = signal::escalate(self.wait_blocking(rx))?;
        if let Some(BridgeError::Fatal(fatal)) = &envelope.error {
            if signal::in_callback() {
                signal::raise_fatal(*fatal);
            }
        }
        Ok(Some(envelope))
    }

    /// Like [`enqueue`](Self::enqueue) with `wait`, but awaits the reply
    /// instead of blocking the calling thread.
    pub async fn enqueue_async(&self, command: Command) -> BridgeResult<ResultEnvelope> {
        if self.shared.is_deleted() {
            return Err(BridgeError::Deleted);
        }
        if self.on_owning_thread() {
            return Ok(self.execute_here(command));
        }
        let (tx, mut rx) = oneshot::channel();
        self.submit(command, Some(Reply::Async(tx)))?;

        let deadline = self.shared.config.wait_timeout().map(|t| Instant::now() + t);
        loop {
            let slice = self.wait_slice(deadline);
            match tokio::time::timeout(slice, &mut rx).await {
                Ok(Ok(envelope)) => return Ok(envelope),
                Ok(Err(_)) => return Err(self.disconnected()),
                Err(_) => self.check_waiting(deadline)?,
            }
        }
    }

    fn execute_here(&self, command: Command) -> ResultEnvelope {
        let stats = &self.shared.dispatcher.stats;
        stats.submitted.fetch_add(1, Ordering::Relaxed);
        let result = match local::get(self.shared.id) {
            Some(interp) => {
                match catch_unwind(AssertUnwindSafe(|| catch_fatal(|| execute(&interp, command)))) {
                    Ok(result) => result,
                    // Still unwinding: a fatal signal inside a callback or a panic.
                    Err(payload) => {
                        stats.record_finished(true);
                        resume_unwind(payload)
                    }
                }
            }
            None => Err(BridgeError::Deleted),
        };
        stats.record_finished(result.is_err());
        result.into()
    }

    fn submit(&self, command: Command, reply: Option<Reply>) -> BridgeResult<()> {
        let shared = &self.shared;
        if shared.bridge.is_interrupted() {
            return Err(BridgeError::Fatal(FatalSignal::Interrupt));
        }
        trace!(interp = shared.id, ?command, "queueing command");
        shared.dispatcher.push(QueuedCommand { command, reply });

        let weak = Arc::downgrade(shared);
        let posted = notifier::thread_queue_event(shared.owner, Box::new(move || serve_one(weak)))
            .and_then(|()| notifier::thread_alert(shared.owner));
        if let Err(e) = posted {
            warn!(interp = shared.id, error = %e, "owning thread is gone");
            shared.dispatcher.drain_with(BridgeError::OwnerGone);
            return Err(BridgeError::OwnerGone);
        }
        // Deletion may have drained the queue between the check and the push.
        if shared.is_deleted() {
            shared.dispatcher.drain_with(BridgeError::Deleted);
        }
        Ok(())
    }

    fn wait_blocking(&self, rx: Receiver<ResultEnvelope>) -> BridgeResult<ResultEnvelope> {
        let deadline = self.shared.config.wait_timeout().map(|t| Instant::now() + t);
        loop {
            match rx.recv_timeout(self.wait_slice(deadline)) {
                Ok(envelope) => return Ok(envelope),
                Err(RecvTimeoutError::Timeout) => self.check_waiting(deadline)?,
                Err(RecvTimeoutError::Disconnected) => return Err(self.disconnected()),
            }
        }
    }

    fn wait_slice(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(WAIT_SLICE),
            None => WAIT_SLICE,
        }
    }

    fn check_waiting(&self, deadline: Option<Instant>) -> BridgeResult<()> {
        if self.shared.bridge.is_interrupted() {
            return Err(BridgeError::Fatal(FatalSignal::Interrupt));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BridgeError::Timeout);
        }
        if !notifier::is_registered(self.shared.owner) {
            return Err(BridgeError::OwnerGone);
        }
        Ok(())
    }

    fn disconnected(&self) -> BridgeError {
        if self.shared.is_deleted() {
            BridgeError::Deleted
        } else {
            BridgeError::OwnerGone
        }
    }
}
