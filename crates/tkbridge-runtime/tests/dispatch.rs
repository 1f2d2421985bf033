//! Cross-thread dispatch into an interpreter's owning thread.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tkbridge_runtime::{
    Bridge, BridgeConfig, BridgeError, Command, Interpreter, InterpreterConfig, InterpreterThread,
};

fn bridge() -> Arc<Bridge> {
    Bridge::new(BridgeConfig::default())
}

#[test]
fn test_owner_and_cross_thread_evaluate_agree() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    interp.evaluate("set base 10").unwrap();
    let here = interp.evaluate("expr {$base * 4 + 2}").unwrap();

    let remote = interp.clone();
    let caller = thread::spawn(move || {
        let result = remote.evaluate("expr {$base * 4 + 2}");
        remote.stop_loop();
        result
    });
    interp.run_loop().unwrap();

    assert_eq!(caller.join().unwrap().unwrap(), here);
    assert_eq!(here, "42");
}

#[test]
fn test_concurrent_blocking_commands_are_paired() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    interp.evaluate("set counter 0").unwrap();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let sink = executed.clone();
    let id = interp
        .register_callback(move |args: &[String]| {
            sink.lock().push((args[0].clone(), args[1].clone()));
            format!("{}:{}", args[0], args[1])
        })
        .unwrap();

    let callers: Vec<_> = (0..2)
        .map(|t| {
            let interp = interp.clone();
            let id = id.clone();
            thread::spawn(move || {
                for j in 0..100 {
                    let result = interp
                        .evaluate(&format!("incr counter; host_callback {} {} {}", id, t, j))
                        .unwrap();
                    assert_eq!(result, format!("{}:{}", t, j));
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(interp.get_variable("counter").unwrap().as_deref(), Some("200"));
    let executed = executed.lock();
    assert_eq!(executed.len(), 200);
    let unique: HashSet<_> = executed.iter().collect();
    assert_eq!(unique.len(), 200);

    let stats = interp.stats();
    assert_eq!(stats.in_flight(), 0);
    assert_eq!(stats.failed, 0);
    worker.shutdown().unwrap();
}

#[test]
fn test_single_producer_order_is_kept() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    interp.evaluate("set log {}").unwrap();

    for i in 0..20 {
        interp
            .enqueue(Command::Eval(format!("lappend log {}", i)), false)
            .unwrap();
    }
    let log = interp.evaluate("set log").unwrap();
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(Interpreter::split_list(&log).unwrap(), expected);
    worker.shutdown().unwrap();
}

#[test]
fn test_errors_keep_their_kind_across_threads() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    assert_eq!(
        interp.evaluate("error {bad thing}"),
        Err(BridgeError::eval("bad thing"))
    );
    assert_eq!(
        interp.call_on_owner(|_| -> Result<(), BridgeError> {
            Err(BridgeError::UnknownCallback("cb9".into()))
        }),
        Err(BridgeError::UnknownCallback("cb9".into()))
    );
    // The loop keeps serving after failures.
    assert_eq!(interp.evaluate("set ok yes").unwrap(), "yes");
    worker.shutdown().unwrap();
}

#[test]
fn test_invoke_passes_words_verbatim() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    let tricky = "$not_a_var [not a command] {unbalanced";
    assert_eq!(interp.invoke(&["set", "v", tricky]).unwrap(), tricky);
    assert_eq!(interp.get_variable("v").unwrap().as_deref(), Some(tricky));
    worker.shutdown().unwrap();
}

#[test]
fn test_queue_for_main_runs_on_owner() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    let owner = interp.owner();

    let (tx, rx) = crossbeam_channel::bounded(1);
    interp
        .queue_for_main(move || {
            let _ = tx.send(thread::current().id());
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), owner);
    worker.shutdown().unwrap();
}

#[test]
fn test_variables_from_other_threads() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    assert_eq!(interp.set_variable("greeting", "hello").unwrap(), "hello");
    assert_eq!(
        interp.evaluate("string toupper $greeting").unwrap(),
        "HELLO"
    );
    assert!(interp.unset_variable("greeting").unwrap());
    assert_eq!(interp.get_variable("greeting").unwrap(), None);
    worker.shutdown().unwrap();
}

#[test]
fn test_wait_timeout_when_owner_is_not_looping() {
    let bridge = bridge();
    let config = InterpreterConfig::default().wait_timeout_ms(100);
    let interp = Interpreter::create_in(&bridge, config).unwrap();

    let remote = interp.clone();
    let started = Instant::now();
    let result = thread::spawn(move || remote.evaluate("set x 1"))
        .join()
        .unwrap();
    assert_eq!(result, Err(BridgeError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_queued_commands_answered_on_delete() {
    let bridge = bridge();
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();

    let remote = interp.clone();
    let caller = thread::spawn(move || remote.evaluate("set x 1"));
    let deadline = Instant::now() + Duration::from_secs(5);
    while interp.pending_commands() == 0 {
        assert!(Instant::now() < deadline, "command never queued");
        thread::sleep(Duration::from_millis(1));
    }

    interp.delete();
    assert_eq!(caller.join().unwrap(), Err(BridgeError::Deleted));
    assert_eq!(interp.stats().failed, 1);
}

#[test]
fn test_owner_reentry_from_callback() {
    let bridge = bridge();
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    let inner = interp.clone();
    let id = interp
        .register_callback(move |_: &[String]| {
            assert!(inner.on_owning_thread());
            assert!(tkbridge_runtime::in_callback());
            inner.evaluate("set nested [expr {2 + 3}]")
        })
        .unwrap();

    assert_eq!(interp.evaluate(&format!("host_callback {}", id)).unwrap(), "5");
    assert_eq!(interp.get_variable("nested").unwrap().as_deref(), Some("5"));
    worker.shutdown().unwrap();
}
