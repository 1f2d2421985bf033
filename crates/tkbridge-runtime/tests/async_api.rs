//! Awaiting results instead of blocking.

use tkbridge_runtime::{
    Bridge, BridgeConfig, BridgeError, Interpreter, InterpreterConfig, InterpreterThread,
};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_handle_is_send_and_sync() {
    assert_send_sync::<Interpreter>();
    assert_send_sync::<Bridge>();
}

#[tokio::test]
async fn test_evaluate_async() {
    let bridge = Bridge::new(BridgeConfig::default());
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();

    assert_eq!(interp.evaluate_async("set x 7").await.unwrap(), "7");
    assert_eq!(
        interp
            .invoke_async(vec!["string".into(), "length".into(), "hello".into()])
            .await
            .unwrap(),
        "5"
    );
    assert_eq!(
        interp.evaluate_async("error nope").await,
        Err(BridgeError::eval("nope"))
    );
    assert!(matches!(
        interp.invoke_async(Vec::new()).await,
        Err(BridgeError::InvalidArgument(_))
    ));
    worker.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_share_one_interpreter() {
    let bridge = Bridge::new(BridgeConfig::default());
    let worker = InterpreterThread::spawn_in(&bridge, InterpreterConfig::default()).unwrap();
    let interp = worker.handle().clone();
    interp.evaluate_async("set total 0").await.unwrap();

    let tasks: Vec<_> = (1..=50)
        .map(|i| {
            let interp = interp.clone();
            tokio::spawn(async move {
                interp
                    .evaluate_async(&format!("incr total {}", i))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(interp.evaluate_async("set total").await.unwrap(), "1275");
    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_async_wait_times_out() {
    let bridge = Bridge::new(BridgeConfig::default());
    let (tx, rx) = std::sync::mpsc::channel();
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    // Owner that never services events until told to exit.
    let owner = std::thread::spawn(move || {
        let config = InterpreterConfig::default().wait_timeout_ms(50);
        let interp = Interpreter::create_in(&bridge, config).unwrap();
        tx.send(interp.clone()).unwrap();
        let _ = done_rx.recv();
        interp.delete();
    });

    let interp = rx.recv().unwrap();
    assert_eq!(
        interp.evaluate_async("set x 1").await,
        Err(BridgeError::Timeout)
    );
    done_tx.send(()).unwrap();
    owner.join().unwrap();
    assert!(interp.is_deleted());
}
