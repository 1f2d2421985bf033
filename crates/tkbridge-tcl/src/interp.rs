//! The interpreter object.
//!
//! An [`Interp`] is a cheap reference-counted handle. It is deliberately
//! neither `Send` nor `Sync`: every interpreter belongs to the thread that
//! created it, and all calls into it must happen on that thread.

use crate::error::{Code, Exception, TclError, TclResult};
use crate::notifier::{self, IdleToken, TimerToken};
use crate::parser::{self, Part};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Signature of a command implementation. `args[0]` is the command name.
pub type CommandFn = dyn Fn(&Interp, &[String]) -> TclResult;

/// Maximum depth of nested command invocations.
const MAX_NESTING: usize = 1000;

#[derive(Default)]
struct Frame {
    vars: HashMap<String, String>,
    globals: HashSet<String>,
}

/// A scheduled `after` handler.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AfterToken {
    Timer(TimerToken),
    Idle(IdleToken),
}

impl AfterToken {
    pub(crate) fn cancel(self) {
        match self {
            Self::Timer(token) => {
                notifier::delete_timer_handler(token);
            }
            Self::Idle(token) => {
                notifier::cancel_idle(token);
            }
        }
    }
}

struct Inner {
    name: String,
    safe: bool,
    deleted: Cell<bool>,
    parent: Weak<Inner>,
    commands: RefCell<HashMap<String, Rc<CommandFn>>>,
    frames: RefCell<Vec<Frame>>,
    global_writes: RefCell<HashMap<String, u64>>,
    children: RefCell<BTreeMap<String, Interp>>,
    next_child: Cell<u64>,
    delete_callbacks: RefCell<Vec<Box<dyn FnOnce(&Interp)>>>,
    child_listeners: RefCell<Vec<Rc<dyn Fn(&Interp)>>>,
    depth: Cell<usize>,
    afters: RefCell<HashMap<String, AfterToken>>,
    next_after: Cell<u64>,
}

/// A single-threaded command interpreter.
#[derive(Clone)]
pub struct Interp(Rc<Inner>);

impl fmt::Debug for Interp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interp")
            .field("name", &self.0.name)
            .field("safe", &self.0.safe)
            .field("deleted", &self.0.deleted.get())
            .finish()
    }
}

impl Interp {
    /// Create a top-level, unrestricted interpreter on the current thread.
    pub fn new() -> Result<Self, TclError> {
        Self::build(String::new(), false, Weak::new())
    }

    /// Create a top-level interpreter with the unsafe commands removed.
    pub fn new_safe() -> Result<Self, TclError> {
        Self::build(String::new(), true, Weak::new())
    }

    fn build(name: String, safe: bool, parent: Weak<Inner>) -> Result<Self, TclError> {
        if !crate::is_initialized() {
            return Err(TclError::NotInitialized);
        }
        // Make sure this thread has a notifier before anything is queued to it.
        let thread = notifier::current_thread();

        let interp = Self(Rc::new(Inner {
            name,
            safe,
            deleted: Cell::new(false),
            parent,
            commands: RefCell::new(HashMap::new()),
            frames: RefCell::new(vec![Frame::default()]),
            global_writes: RefCell::new(HashMap::new()),
            children: RefCell::new(BTreeMap::new()),
            next_child: Cell::new(0),
            delete_callbacks: RefCell::new(Vec::new()),
            child_listeners: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            afters: RefCell::new(HashMap::new()),
            next_after: Cell::new(0),
        }));

        crate::commands::register(&interp);
        {
            let mut frames = interp.0.frames.borrow_mut();
            let globals = &mut frames[0].vars;
            globals.insert("tcl_patchLevel".into(), crate::PATCH_LEVEL.to_string());
            globals.insert("tcl_version".into(), crate::version_string());
        }

        debug!(name = %interp.0.name, safe, ?thread, "interpreter created");
        Ok(interp)
    }

    /// Name of this interpreter within its parent; empty for a top-level one.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_safe(&self) -> bool {
        self.0.safe
    }

    pub fn is_deleted(&self) -> bool {
        self.0.deleted.get()
    }

    /// Whether both handles refer to the same interpreter.
    pub fn ptr_eq(&self, other: &Interp) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether a command is currently executing in this interpreter.
    pub fn is_busy(&self) -> bool {
        self.0.depth.get() > 0
    }

    fn check_live(&self) -> Result<(), Exception> {
        if self.is_deleted() {
            Err(Exception::error(
                "attempt to call eval in deleted interpreter",
            ))
        } else {
            Ok(())
        }
    }

    // --- evaluation -------------------------------------------------------

    /// Evaluate a script.
    ///
    /// At the outermost level a `return` becomes a normal result and a stray
    /// `break` or `continue` becomes an error. Nested calls (made from inside
    /// a running command) see the raw completion code instead.
    pub fn eval(&self, script: &str) -> TclResult {
        let result = self.eval_script(script);
        self.finish(result)
    }

    /// Evaluate a script and hand back its completion code as is, even at
    /// the outermost level.
    pub fn eval_raw(&self, script: &str) -> TclResult {
        self.eval_script(script)
    }

    /// Invoke a command with already-split words, bypassing substitution.
    pub fn invoke<S: AsRef<str>>(&self, words: &[S]) -> TclResult {
        let words: Vec<String> = words.iter().map(|w| w.as_ref().to_string()).collect();
        let result = self.invoke_words(&words);
        self.finish(result)
    }

    fn finish(&self, result: TclResult) -> TclResult {
        if self.is_busy() {
            return result;
        }
        match result {
            Err(e) if matches!(e.code, Code::Return | Code::Ok) => Ok(e.value),
            Err(e) if matches!(e.code, Code::Break | Code::Continue) => Err(Exception::error(
                format!("invoked \"{}\" outside of a loop", e.code),
            )),
            other => other,
        }
    }

    /// Evaluate a script, propagating every completion code unchanged.
    pub(crate) fn eval_script(&self, script: &str) -> TclResult {
        self.check_live()?;
        let commands = parser::parse_script(script)?;
        let mut result = String::new();
        for command in &commands {
            let mut words = Vec::with_capacity(command.len());
            for word in command {
                words.push(self.subst_parts(&word.0)?);
            }
            result = self.invoke_words(&words)?;
        }
        Ok(result)
    }

    pub(crate) fn subst_parts(&self, parts: &[Part]) -> TclResult {
        let mut out = String::new();
        for part in parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Var(name) => out.push_str(&self.read_var(name)?),
                Part::Script(script) => out.push_str(&self.eval_script(script)?),
            }
        }
        Ok(out)
    }

    pub(crate) fn invoke_words(&self, words: &[String]) -> TclResult {
        let Some(name) = words.first() else {
            return Ok(String::new());
        };
        self.check_live()?;

        let command = self.0.commands.borrow().get(name).cloned();
        let Some(command) = command else {
            return Err(Exception::error(format!(
                "invalid command name \"{}\"",
                name
            )));
        };

        let depth = self.0.depth.get();
        if depth >= MAX_NESTING {
            return Err(Exception::error(
                "too many nested evaluations (infinite loop?)",
            ));
        }
        self.0.depth.set(depth + 1);
        // Restore the depth even if the command unwinds.
        let _depth = scopeguard::guard(&self.0.depth, move |d| d.set(depth));
        trace!(command = %name, depth, "invoke");
        command(self, words)
    }

    // --- variables --------------------------------------------------------

    fn with_var_frame<R>(&self, name: &str, f: impl FnOnce(&mut Frame, &str, bool) -> R) -> R {
        let mut frames = self.0.frames.borrow_mut();
        let (global, name) = match name.strip_prefix("::") {
            Some(stripped) => (true, stripped),
            None => {
                let top = frames.len() - 1;
                (top == 0 || frames[top].globals.contains(name), name)
            }
        };
        let index = if global { 0 } else { frames.len() - 1 };
        f(&mut frames[index], name, global)
    }

    pub(crate) fn read_var(&self, name: &str) -> TclResult {
        self.with_var_frame(name, |frame, n, _| frame.vars.get(n).cloned())
            .ok_or_else(|| {
                Exception::error(format!("can't read \"{}\": no such variable", name))
            })
    }

    pub(crate) fn var_exists(&self, name: &str) -> bool {
        self.with_var_frame(name, |frame, n, _| frame.vars.contains_key(n))
    }

    pub(crate) fn write_var(&self, name: &str, value: impl Into<String>) -> TclResult {
        let value = value.into();
        let global = self.with_var_frame(name, |frame, n, global| {
            frame.vars.insert(n.to_string(), value.clone());
            global.then(|| n.to_string())
        });
        if let Some(n) = global {
            *self.0.global_writes.borrow_mut().entry(n).or_default() += 1;
        }
        Ok(value)
    }

    pub(crate) fn remove_var(&self, name: &str) -> Result<(), Exception> {
        self.with_var_frame(name, |frame, n, _| frame.vars.remove(n))
            .map(|_| ())
            .ok_or_else(|| {
                Exception::error(format!("can't unset \"{}\": no such variable", name))
            })
    }

    /// Make `name` in the current procedure frame refer to the global one.
    pub(crate) fn link_global(&self, name: &str) {
        let mut frames = self.0.frames.borrow_mut();
        let top = frames.len() - 1;
        if top > 0 {
            frames[top].globals.insert(name.to_string());
        }
    }

    /// Number of writes a global variable has seen; used by `vwait`.
    pub(crate) fn global_write_count(&self, name: &str) -> u64 {
        let name = name.strip_prefix("::").unwrap_or(name);
        self.0.global_writes.borrow().get(name).copied().unwrap_or(0)
    }

    /// Current procedure nesting level; 0 at global scope.
    pub(crate) fn level(&self) -> usize {
        self.0.frames.borrow().len() - 1
    }

    /// Run `body` in a fresh procedure frame holding `vars`.
    pub(crate) fn with_frame<R>(
        &self,
        vars: HashMap<String, String>,
        body: impl FnOnce() -> R,
    ) -> R {
        self.0.frames.borrow_mut().push(Frame {
            vars,
            globals: HashSet::new(),
        });
        let _frame = scopeguard::guard(&self.0.frames, |frames| {
            frames.borrow_mut().pop();
        });
        body()
    }

    /// Evaluate a script at global scope, as event handlers do.
    pub(crate) fn eval_at_global(&self, script: &str) -> TclResult {
        let saved = self.0.frames.borrow_mut().split_off(1);
        let _restore = scopeguard::guard(saved, |saved| {
            self.0.frames.borrow_mut().extend(saved);
        });
        self.eval(script)
    }

    /// Read a global variable.
    pub fn get_var(&self, name: &str) -> Option<String> {
        let name = name.strip_prefix("::").unwrap_or(name);
        self.0.frames.borrow()[0].vars.get(name).cloned()
    }

    /// Set a global variable, returning the new value.
    pub fn set_var(&self, name: &str, value: &str) -> TclResult {
        self.check_live()?;
        let name = name.strip_prefix("::").unwrap_or(name);
        self.0.frames.borrow_mut()[0]
            .vars
            .insert(name.to_string(), value.to_string());
        *self
            .0
            .global_writes
            .borrow_mut()
            .entry(name.to_string())
            .or_default() += 1;
        Ok(value.to_string())
    }

    /// Remove a global variable. Returns whether it existed.
    pub fn unset_var(&self, name: &str) -> bool {
        let name = name.strip_prefix("::").unwrap_or(name);
        self.0.frames.borrow_mut()[0].vars.remove(name).is_some()
    }

    // --- commands ---------------------------------------------------------

    /// Register a command, replacing any existing one of the same name.
    /// Ignored once the interpreter is deleted.
    pub fn create_command(
        &self,
        name: &str,
        command: impl Fn(&Interp, &[String]) -> TclResult + 'static,
    ) {
        if self.is_deleted() {
            return;
        }
        self.0
            .commands
            .borrow_mut()
            .insert(name.to_string(), Rc::new(command));
    }

    /// Remove a command. Returns whether it existed.
    pub fn delete_command(&self, name: &str) -> bool {
        self.0.commands.borrow_mut().remove(name).is_some()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.0.commands.borrow().contains_key(name)
    }

    /// Sorted names of all registered commands.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.commands.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    // --- children ---------------------------------------------------------

    /// Create a child interpreter. A safe parent only creates safe children.
    pub fn create_child(&self, name: &str, safe: bool) -> Result<Interp, Exception> {
        self.check_live()?;
        if name.is_empty() {
            return Err(Exception::error("interpreter name must not be empty"));
        }
        if self.0.children.borrow().contains_key(name) {
            return Err(Exception::error(format!(
                "interpreter named \"{}\" already exists, cannot create",
                name
            )));
        }
        let child = Self::build(
            name.to_string(),
            safe || self.is_safe(),
            Rc::downgrade(&self.0),
        )
        .map_err(|e| Exception::error(e.to_string()))?;
        self.0
            .children
            .borrow_mut()
            .insert(name.to_string(), child.clone());

        let listeners = self.0.child_listeners.borrow().clone();
        for listener in listeners {
            listener(&child);
        }
        Ok(child)
    }

    /// Run `listener` with every child created from now on, whether by
    /// [`create_child`](Self::create_child) or by `interp create`.
    pub fn call_when_child_created(&self, listener: impl Fn(&Interp) + 'static) {
        self.0.child_listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Generate an unused child name of the form `interpN`.
    pub(crate) fn next_child_name(&self) -> String {
        loop {
            let n = self.0.next_child.get();
            self.0.next_child.set(n + 1);
            let name = format!("interp{}", n);
            if !self.0.children.borrow().contains_key(&name) {
                return name;
            }
        }
    }

    pub fn child(&self, name: &str) -> Option<Interp> {
        self.0.children.borrow().get(name).cloned()
    }

    /// Names of live children, sorted.
    pub fn children(&self) -> Vec<String> {
        self.0.children.borrow().keys().cloned().collect()
    }

    pub fn parent(&self) -> Option<Interp> {
        self.0.parent.upgrade().map(Interp)
    }

    // --- deletion ---------------------------------------------------------

    /// Run `callback` when this interpreter is deleted. Runs immediately if
    /// it already is.
    pub fn call_when_deleted(&self, callback: impl FnOnce(&Interp) + 'static) {
        if self.is_deleted() {
            callback(self);
            return;
        }
        self.0.delete_callbacks.borrow_mut().push(Box::new(callback));
    }

    /// Delete the interpreter: children first, then pending `after`
    /// handlers, then the deletion callbacks, then all commands and
    /// variables. Deleting twice is a no-op.
    pub fn delete(&self) {
        if self.0.deleted.replace(true) {
            return;
        }
        debug!(name = %self.0.name, "deleting interpreter");

        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children.into_values() {
            child.delete();
        }

        if let Some(parent) = self.0.parent.upgrade() {
            parent.children.borrow_mut().remove(&self.0.name);
        }

        let afters = std::mem::take(&mut *self.0.afters.borrow_mut());
        for token in afters.into_values() {
            token.cancel();
        }

        self.0.child_listeners.borrow_mut().clear();
        let callbacks = std::mem::take(&mut *self.0.delete_callbacks.borrow_mut());
        for callback in callbacks {
            callback(self);
        }

        let commands = std::mem::take(&mut *self.0.commands.borrow_mut());
        drop(commands);
        let frames = std::mem::replace(
            &mut *self.0.frames.borrow_mut(),
            vec![Frame::default()],
        );
        drop(frames);
    }

    // --- after handlers ---------------------------------------------------

    pub(crate) fn next_after_id(&self) -> String {
        let n = self.0.next_after.get();
        self.0.next_after.set(n + 1);
        format!("after#{}", n)
    }

    pub(crate) fn after_insert(&self, id: String, token: AfterToken) {
        self.0.afters.borrow_mut().insert(id, token);
    }

    pub(crate) fn after_take(&self, id: &str) -> Option<AfterToken> {
        self.0.afters.borrow_mut().remove(id)
    }

    pub(crate) fn after_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.afters.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }
}
