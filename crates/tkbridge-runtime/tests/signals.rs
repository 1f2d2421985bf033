//! Control signals raised by host callbacks, and fatal signals.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tkbridge_runtime::{
    Bridge, BridgeConfig, BridgeError, FatalSignal, Interpreter, InterpreterConfig,
    InterpreterThread, Outcome,
};

fn local_interp() -> (Arc<Bridge>, Interpreter) {
    let bridge = Bridge::new(BridgeConfig::default());
    let interp = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    (bridge, interp)
}

#[test]
fn test_break_from_callback_is_break_code() {
    let (_bridge, interp) = local_interp();
    let id = interp.register_callback(|_: &[String]| Outcome::Break).unwrap();
    assert_eq!(id, "cb1");
    assert_eq!(interp.evaluate("catch {host_callback cb1}").unwrap(), "3");

    let script = "set n 0; foreach x {1 2 3 4} { incr n; if {$x == 2} { host_callback cb1 } }; set n";
    assert_eq!(interp.evaluate(script).unwrap(), "2");
}

#[test]
fn test_continue_and_return_codes() {
    let (_bridge, interp) = local_interp();
    let skip = interp
        .register_callback(|args: &[String]| {
            if args[0] == "2" {
                Outcome::Continue
            } else {
                Outcome::Normal(None)
            }
        })
        .unwrap();
    let script = format!(
        "set seen {{}}; foreach x {{1 2 3}} {{ host_callback {} $x; lappend seen $x }}; set seen",
        skip
    );
    assert_eq!(interp.evaluate(&script).unwrap(), "1 3");

    let ret = interp
        .register_callback(|_: &[String]| Outcome::Return(Some("value".into())))
        .unwrap();
    assert_eq!(
        interp.evaluate(&format!("catch {{host_callback {}}} r; set r", ret)).unwrap(),
        "value"
    );
    assert_eq!(
        interp.evaluate(&format!("catch {{host_callback {}}}", ret)).unwrap(),
        "2"
    );
}

#[test]
fn test_error_outcome_is_script_error() {
    let (_bridge, interp) = local_interp();
    let id = interp
        .register_callback(|args: &[String]| Outcome::error(format!("rejected {}", args[0])))
        .unwrap();
    assert_eq!(
        interp.evaluate(&format!("catch {{host_callback {} x}} msg; set msg", id)).unwrap(),
        "rejected x"
    );
    assert_eq!(
        interp.evaluate(&format!("host_callback {} y", id)),
        Err(BridgeError::eval("rejected y"))
    );
}

#[test]
fn test_question_mark_errors_become_script_errors() {
    let (_bridge, interp) = local_interp();
    let id = interp
        .register_callback(|args: &[String]| -> anyhow::Result<i64> {
            let n: i64 = args[0].parse()?;
            Ok(n * 2)
        })
        .unwrap();
    assert_eq!(interp.evaluate(&format!("host_callback {} 21", id)).unwrap(), "42");
    assert!(matches!(
        interp.evaluate(&format!("host_callback {} nope", id)),
        Err(BridgeError::Eval { .. })
    ));
}

#[test]
fn test_panicking_callback_does_not_poison_interpreter() {
    let (_bridge, interp) = local_interp();
    let id = interp
        .register_callback(|_: &[String]| -> Outcome { panic!("host bug") })
        .unwrap();
    assert_eq!(
        interp.evaluate(&format!("host_callback {}", id)),
        Err(BridgeError::eval("host callback panicked: host bug"))
    );
    assert_eq!(interp.evaluate("set still 1").unwrap(), "1");
}

#[test]
fn test_unregistered_callback_fails() {
    let (_bridge, interp) = local_interp();
    let id = interp.register_callback(|_: &[String]| ()).unwrap();
    interp.unregister_callback(&id).unwrap();
    interp.unregister_callback(&id).unwrap();
    assert_eq!(
        interp.callbacks().dispatch(&id, &[]),
        Err(BridgeError::UnknownCallback(id.clone()))
    );
    assert!(interp.evaluate(&format!("host_callback {}", id)).is_err());

    let next = interp.register_callback(|_: &[String]| ()).unwrap();
    assert_eq!(next, "cb2");
}

#[test]
fn test_fatal_signal_reaches_owner_entry_point() {
    let (_bridge, interp) = local_interp();
    interp
        .register_callback(|_: &[String]| Outcome::Fatal(FatalSignal::Exit(3)))
        .unwrap();
    // `catch` must not swallow it.
    assert_eq!(
        interp.evaluate("catch {host_callback cb1}"),
        Err(BridgeError::Fatal(FatalSignal::Exit(3)))
    );
    assert_eq!(interp.evaluate("set after 1").unwrap(), "1");
}

#[test]
fn test_fatal_signal_escapes_nested_evaluations() {
    let (_bridge, interp) = local_interp();
    let fatal = interp
        .register_callback(|_: &[String]| Outcome::Fatal(FatalSignal::Exit(9)))
        .unwrap();

    // Two nested levels, each dropping the result of its inner evaluate.
    let inner = interp.clone();
    let middle = interp
        .register_callback(move |_: &[String]| {
            let _ = inner.evaluate(&format!("host_callback {}", fatal));
            "middle kept going"
        })
        .unwrap();
    let inner = interp.clone();
    let outer = interp
        .register_callback(move |_: &[String]| {
            let _ = inner.evaluate(&format!("catch {{host_callback {}}}", middle));
            let _ = inner.evaluate_outcome("set reached_outer 1");
            "outer kept going"
        })
        .unwrap();

    assert_eq!(
        interp.evaluate(&format!("host_callback {}; set after_fatal reached", outer)),
        Err(BridgeError::Fatal(FatalSignal::Exit(9)))
    );
    assert!(!tkbridge_runtime::in_callback());
    assert_eq!(interp.get_variable("after_fatal").unwrap(), None);
    assert_eq!(interp.get_variable("reached_outer").unwrap(), None);

    // The interpreter stays usable and the counters balance.
    assert_eq!(interp.evaluate("set after 1").unwrap(), "1");
    assert_eq!(interp.stats().in_flight(), 0);
}

#[test]
fn test_fatal_reply_from_other_thread_unwinds_callback() {
    let bridge = Bridge::new(BridgeConfig::default());
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let remote = worker.handle().clone();
    let fatal = remote
        .register_callback(|_: &[String]| Outcome::Fatal(FatalSignal::Exit(4)))
        .unwrap();

    let local = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let target = remote.clone();
    let relay = local
        .register_callback(move |_: &[String]| {
            let _ = target.evaluate(&format!("host_callback {}", fatal));
            "ignored"
        })
        .unwrap();

    assert_eq!(
        local.evaluate(&format!("host_callback {}; set after_fatal 1", relay)),
        Err(BridgeError::Fatal(FatalSignal::Exit(4)))
    );
    assert_eq!(local.get_variable("after_fatal").unwrap(), None);
    assert_eq!(worker.shutdown(), Err(BridgeError::Fatal(FatalSignal::Exit(4))));
}

#[test]
fn test_fatal_signal_crosses_threads_and_stops_loop() {
    let bridge = Bridge::new(BridgeConfig::default());
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    let id = interp
        .register_callback(|_: &[String]| Err::<(), _>(BridgeError::Fatal(FatalSignal::Exit(7))))
        .unwrap();

    assert_eq!(
        interp.evaluate(&format!("host_callback {}", id)),
        Err(BridgeError::Fatal(FatalSignal::Exit(7)))
    );
    assert_eq!(worker.shutdown(), Err(BridgeError::Fatal(FatalSignal::Exit(7))));
    assert!(interp.is_deleted());
}

#[test]
fn test_interrupt_stops_loop_and_waiters() {
    let bridge = Bridge::new(BridgeConfig::default());
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    assert_eq!(interp.evaluate("set x 1").unwrap(), "1");

    bridge.interrupt();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !interp.is_deleted() {
        assert!(Instant::now() < deadline, "loop ignored the interrupt");
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(worker.shutdown(), Err(BridgeError::Fatal(FatalSignal::Interrupt)));

    let other = Interpreter::create_in(&bridge, InterpreterConfig::default()).unwrap();
    let remote = other.clone();
    let result = thread::spawn(move || remote.evaluate("set y 1")).join().unwrap();
    assert_eq!(result, Err(BridgeError::Fatal(FatalSignal::Interrupt)));
    bridge.clear_interrupt();
}

#[test]
fn test_host_eval_reaches_evaluator() {
    let (_bridge, interp) = local_interp();
    interp
        .set_host_evaluator(|code: &str| match code {
            "stop" => Outcome::Break,
            other => Outcome::normal(other.len().to_string()),
        })
        .unwrap();
    assert_eq!(interp.evaluate("host_eval {four}").unwrap(), "4");
    assert_eq!(interp.evaluate("catch {host_eval stop}").unwrap(), "3");
}
