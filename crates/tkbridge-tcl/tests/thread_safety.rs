//! Compile-fail tests for thread safety
//!
//! `Interp` must stay on the thread that created it. These doc tests check
//! that moving or sharing one across threads is rejected by the compiler.

/// ```compile_fail
/// use tkbridge_tcl::Interp;
/// use std::thread;
///
/// tkbridge_tcl::initialize();
/// let interp = Interp::new().unwrap();
/// thread::spawn(move || {
///     // Interp is !Send
///     let _ = interp.eval("set x 1");
/// });
/// ```
fn _interp_not_send() {}

/// ```compile_fail
/// use tkbridge_tcl::Interp;
/// use std::sync::Arc;
///
/// tkbridge_tcl::initialize();
/// let interp = Arc::new(Interp::new().unwrap());
/// let shared = interp.clone();
/// std::thread::spawn(move || {
///     // Interp is !Sync
///     let _ = shared;
/// });
/// ```
fn _interp_not_sync() {}

/// Thread events must be `Send`; an `Rc` captured in one is rejected.
///
/// ```compile_fail
/// use std::rc::Rc;
/// use tkbridge_tcl::notifier;
///
/// let owner = notifier::current_thread();
/// let local = Rc::new(1);
/// notifier::thread_queue_event(owner, Box::new(move || drop(local))).unwrap();
/// ```
fn _thread_event_requires_send() {}

#[test]
fn test_interp_works_on_its_own_thread() {
    std::thread::spawn(|| {
        tkbridge_tcl::initialize();
        let interp = tkbridge_tcl::Interp::new().unwrap();
        assert_eq!(interp.eval("expr {1 + 2}").unwrap(), "3");
    })
    .join()
    .unwrap();
}
