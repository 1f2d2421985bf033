//! Handle lifecycle: creation, deletion from every direction, children.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tkbridge_runtime::{
    Bridge, BridgeConfig, BridgeError, Interpreter, InterpreterConfig, InterpreterThread,
};

fn bridge() -> Arc<Bridge> {
    Bridge::new(BridgeConfig::default())
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_create_and_evaluate() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    assert_eq!(interp.evaluate("set x 5; return $x").unwrap(), "5");
    assert!(!interp.is_safe());
    assert_eq!(interp.timer_interval_ms(), 5);
    assert_eq!(bridge.instances().list(), vec![interp.clone()]);
}

#[test]
fn test_delete_is_idempotent_from_any_thread() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    let a = interp.clone();
    let b = interp.clone();
    let t1 = thread::spawn(move || a.delete());
    let t2 = thread::spawn(move || b.delete());
    t1.join().unwrap();
    t2.join().unwrap();
    interp.delete();

    assert!(interp.is_deleted());
    assert!(!bridge.instances().contains(interp.id()));
    assert_eq!(interp.evaluate("set x 1"), Err(BridgeError::Deleted));
    assert_eq!(interp.invoke(&["set", "x"]), Err(BridgeError::Deleted));
    assert_eq!(interp.set_variable("x", "1"), Err(BridgeError::Deleted));
    assert_eq!(interp.create_child("kid", false), Err(BridgeError::Deleted));
    assert_eq!(
        interp.queue_for_main(|| {}),
        Err(BridgeError::Deleted)
    );
    worker.shutdown().unwrap();
}

#[test]
fn test_safe_child_is_a_separate_handle() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    let kid = interp.create_child("kid", true).unwrap();
    assert_ne!(kid, interp);
    assert_ne!(kid.id(), interp.id());
    assert_eq!(kid.name(), "kid");
    assert!(kid.is_safe());
    assert_eq!(kid.owner(), interp.owner());
    assert!(bridge.instances().contains(kid.id()));
    assert_eq!(bridge.instances().count(), 2);

    assert_eq!(interp.evaluate("interp issafe kid").unwrap(), "1");
    assert_eq!(
        kid.evaluate("exec ls"),
        Err(BridgeError::eval("invalid command name \"exec\""))
    );

    // Callbacks and variables are per interpreter.
    let id = kid.register_callback(|_: &[String]| "from kid").unwrap();
    assert_eq!(kid.evaluate(&format!("host_callback {}", id)).unwrap(), "from kid");
    assert!(interp.evaluate(&format!("host_callback {}", id)).is_err());
    kid.set_variable("only_here", "1").unwrap();
    assert_eq!(interp.get_variable("only_here").unwrap(), None);
    worker.shutdown().unwrap();
}

#[test]
fn test_safe_parent_makes_safe_children() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default().safe(true)).unwrap();
    assert!(interp.is_safe());
    let kid = interp.create_child("kid", false).unwrap();
    assert!(kid.is_safe());
}

#[test]
fn test_duplicate_child_name_fails() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let _kid = interp.create_child("kid", false).unwrap();
    assert!(matches!(
        interp.create_child("kid", false),
        Err(BridgeError::Eval { .. })
    ));
}

#[test]
fn test_script_created_child_is_tracked() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    assert_eq!(interp.evaluate("interp create -safe kid").unwrap(), "kid");
    assert_eq!(interp.evaluate("interp exists kid").unwrap(), "1");
    assert_eq!(bridge.instances().count(), 2);

    let kid = bridge
        .instances()
        .list()
        .into_iter()
        .find(|h| h.name() == "kid")
        .unwrap();
    assert_ne!(kid, interp);
    assert!(kid.is_safe());
    assert_eq!(kid.owner(), interp.owner());
    assert_eq!(kid.evaluate("expr {6 * 7}").unwrap(), "42");
    let id = kid.register_callback(|_: &[String]| "from kid").unwrap();
    assert_eq!(kid.evaluate(&format!("host_callback {}", id)).unwrap(), "from kid");

    // The handle does not own the child; dropping it keeps the child alive.
    drop(kid);
    assert_eq!(interp.evaluate("interp exists kid").unwrap(), "1");
    assert_eq!(bridge.instances().count(), 2);

    interp.evaluate("interp delete kid").unwrap();
    assert_eq!(bridge.instances().count(), 1);
}

#[test]
fn test_script_children_of_children_are_tracked() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    interp.evaluate("interp create outer").unwrap();
    interp
        .evaluate("interp eval outer {interp create inner}")
        .unwrap();
    wait_until(|| bridge.instances().count() == 3);

    let names: Vec<String> = bridge
        .instances()
        .list()
        .iter()
        .map(|h| h.name().to_string())
        .collect();
    assert_eq!(names, vec!["", "outer", "inner"]);

    // Reached from another thread through the registry.
    let inner = bridge.instances().list().pop().unwrap();
    assert!(!inner.on_owning_thread());
    assert_eq!(inner.set_variable("v", "deep").unwrap(), "deep");

    interp.evaluate("interp delete outer").unwrap();
    assert!(inner.is_deleted());
    assert_eq!(bridge.instances().count(), 1);
    worker.shutdown().unwrap();
}

#[test]
fn test_script_delete_marks_handle_deleted() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let kid = interp.create_child("kid", false).unwrap();

    interp.evaluate("interp delete kid").unwrap();
    assert!(kid.is_deleted());
    assert!(!bridge.instances().contains(kid.id()));
    assert_eq!(kid.evaluate("set x 1"), Err(BridgeError::Deleted));
    assert_eq!(interp.evaluate("interp exists kid").unwrap(), "0");
}

#[test]
fn test_parent_delete_reaches_children() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let kid = interp.create_child("kid", false).unwrap();
    let grandkid = kid.create_child("grandkid", false).unwrap();

    interp.delete();
    assert!(kid.is_deleted());
    assert!(grandkid.is_deleted());
    assert_eq!(bridge.instances().count(), 0);
}

#[test]
fn test_owner_thread_exit_deletes_handle() {
    let bridge = bridge();
    let inner = bridge.clone();
    let interp = thread::spawn(move || {
        let interp = Interpreter::create_in(&inner, InterpreterConfig::default()).unwrap();
        interp.evaluate("set x 1").unwrap();
        interp
    })
    .join()
    .unwrap();

    assert!(interp.is_deleted());
    assert_eq!(interp.evaluate("set x"), Err(BridgeError::Deleted));
    assert_eq!(bridge.instances().count(), 0);
}

#[test]
fn test_drop_from_other_thread_releases_on_owner() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let kid = worker.handle().create_child("kid", false).unwrap();
    let kid_id = kid.id();
    drop(kid);

    assert!(!bridge.instances().contains(kid_id));
    let parent = worker.handle().clone();
    wait_until(|| parent.evaluate("interp exists kid").unwrap() == "0");
    worker.shutdown().unwrap();
}

#[test]
fn test_fire_and_forget_survives_handle_drop() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let parent = worker.handle().clone();
    let kid = parent.create_child("kid", false).unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    kid.queue_for_main(move || {
        let _ = tx.send(());
    })
    .unwrap();
    drop(kid);

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    worker.shutdown().unwrap();
}

#[test]
fn test_registry_lists_in_creation_order() {
    let bridge = bridge();
    let a = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let b = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let c = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    assert_eq!(bridge.instances().list(), vec![a.clone(), b.clone(), c.clone()]);

    b.delete();
    assert_eq!(bridge.instances().list(), vec![a.clone(), c.clone()]);
    drop(c);
    assert_eq!(bridge.instances().list(), vec![a]);
}
