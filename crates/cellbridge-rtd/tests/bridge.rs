use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use cellbridge_common::{CallerAddress, CellValue, ExcelError, ExcelErrorKind, WorkbookScoped};
use cellbridge_rtd::{
    ArgsTask, AsyncTaskBridge, RtdConfig, RtdNotifier, RtdPublisher, RtdServer, SubscriberId,
};
use parking_lot::Mutex;

type TaskResult = Result<(), ExcelError>;

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn bridge() -> AsyncTaskBridge<CellValue> {
    let config = RtdConfig {
        reap_interval: Duration::from_millis(5),
        ..RtdConfig::default()
    };
    let server = RtdServer::spawn(config, || {}).expect("spawn worker");
    AsyncTaskBridge::new(Arc::new(server))
}

/// Publishes `2 * arg` then idles until cancelled, counting starts.
fn doubler(
    starts: Arc<AtomicUsize>,
    arg: i64,
) -> ArgsTask<i64, impl Fn(&i64, &RtdNotifier<CellValue>) -> TaskResult + Send + Sync + 'static> {
    ArgsTask::new(arg, move |arg: &i64, n: &RtdNotifier<CellValue>| -> TaskResult {
        starts.fetch_add(1, Ordering::SeqCst);
        n.publish(arg * 2);
        while !n.cancelled() {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    })
}

#[test]
fn equal_requests_share_one_task() {
    let bridge = bridge();
    let starts = Arc::new(AtomicUsize::new(0));

    let first = bridge.request("calc", doubler(starts.clone(), 21)).expect("request");
    assert!(first.is_pending() || *first == CellValue::Int(42));
    assert!(wait_until(|| bridge.server().value("calc").is_some()));

    let again = bridge.request("calc", doubler(starts.clone(), 21)).expect("request");
    assert_eq!(*again, CellValue::Int(42));
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // Different arguments restart the work
    bridge.request("calc", doubler(starts.clone(), 5)).expect("request");
    assert!(wait_until(|| {
        bridge.server().value("calc").as_deref() == Some(&CellValue::Int(10))
    }));
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(bridge.len(), 1);
}

#[test]
fn stopped_task_is_restarted_on_next_request() {
    let bridge = bridge();
    let starts = Arc::new(AtomicUsize::new(0));
    let server = Arc::clone(bridge.server());

    bridge.request("calc", doubler(starts.clone(), 1)).expect("request");
    server.connect(SubscriberId(1), "calc");
    assert!(wait_until(|| server.subscriber_count("calc") == 1));
    assert!(wait_until(|| starts.load(Ordering::SeqCst) == 1));

    // Cell deleted: last subscriber leaves and the task is cancelled
    server.disconnect(SubscriberId(1));
    assert!(wait_until(|| !server.has_topic("calc")));

    let value = bridge.request("calc", doubler(starts.clone(), 1)).expect("request");
    assert!(value.is_pending() || *value == CellValue::Int(2));
    assert!(wait_until(|| starts.load(Ordering::SeqCst) == 2));
}

#[test]
fn task_errors_and_panics_become_error_values() {
    let bridge = bridge();

    let failing = ArgsTask::new((), |_: &(), _: &RtdNotifier<CellValue>| -> TaskResult {
        Err(ExcelError::new(ExcelErrorKind::Na).with_message("no data"))
    });
    bridge.request("fail", failing).expect("request");

    let panicking = ArgsTask::new((), |_: &(), _: &RtdNotifier<CellValue>| -> TaskResult {
        panic!("task blew up")
    });
    bridge.request("panic", panicking).expect("request");

    let server = bridge.server();
    assert!(wait_until(|| server.value("fail").is_some() && server.value("panic").is_some()));

    match server.value("fail").as_deref() {
        Some(CellValue::Error(err)) => {
            assert_eq!(err.kind, ExcelErrorKind::Na);
            assert_eq!(err.message.as_deref(), Some("no data"));
        }
        other => panic!("expected #N/A, got {other:?}"),
    }
    match server.value("panic").as_deref() {
        Some(CellValue::Error(err)) => {
            assert_eq!(err.kind, ExcelErrorKind::Value);
            assert_eq!(err.message.as_deref(), Some("task blew up"));
        }
        other => panic!("expected #VALUE!, got {other:?}"),
    }
}

#[test]
fn closing_a_workbook_drops_its_tasks() {
    let bridge = bridge();
    let starts = Arc::new(AtomicUsize::new(0));
    let mine = CallerAddress::new("Book1", "Sheet1", "A1");
    let theirs = CallerAddress::new("Book2", "Sheet1", "A1");

    bridge.request_at(&mine, doubler(starts.clone(), 1)).expect("request");
    bridge.request_at(&theirs, doubler(starts.clone(), 2)).expect("request");
    assert!(bridge.is_tracking("[Book1]Sheet1!A1"));
    assert!(bridge.server().has_topic("[Book2]Sheet1!A1"));

    assert_eq!(bridge.close_workbook("Book1"), 1);
    assert!(!bridge.is_tracking("[Book1]Sheet1!A1"));
    assert!(!bridge.server().has_topic("[Book1]Sheet1!A1"));
    assert!(bridge.is_tracking("[Book2]Sheet1!A1"));

    assert_eq!(bridge.clear(), 1);
    assert!(bridge.is_empty());
}

#[test]
fn immediate_results_are_never_lost() {
    let bridge = bridge();
    let echo = |arg: &i64, n: &RtdNotifier<CellValue>| -> TaskResult {
        n.publish(*arg);
        Ok(())
    };
    for i in 0..100i64 {
        bridge.request(&format!("quick{i}"), ArgsTask::new(i, echo)).expect("request");
    }

    let server = bridge.server();
    assert!(wait_until(|| {
        (0..100i64).all(|i| server.value(&format!("quick{i}")).as_deref() == Some(&CellValue::Int(i)))
    }));
}

#[test]
fn superseded_task_cannot_overwrite_its_replacement() {
    let bridge = bridge();
    let server = Arc::clone(bridge.server());
    let (release, released) = mpsc::channel::<()>();
    let released = Mutex::new(released);
    let late_accepted = Arc::new(AtomicBool::new(true));

    let accepted = Arc::clone(&late_accepted);
    let slow = ArgsTask::new(1i64, move |arg: &i64, n: &RtdNotifier<CellValue>| -> TaskResult {
        let _ = released.lock().recv_timeout(Duration::from_secs(5));
        accepted.store(n.publish(*arg), Ordering::SeqCst);
        Ok(())
    });
    let old = server.start_task("t", Arc::new(slow)).expect("start");

    let fast = ArgsTask::new(2i64, |arg: &i64, n: &RtdNotifier<CellValue>| -> TaskResult {
        n.publish(*arg);
        Ok(())
    });
    server.start_task("t", Arc::new(fast)).expect("start");
    assert!(wait_until(|| server.value("t").as_deref() == Some(&CellValue::Int(2))));
    assert!(old.is_stopped());

    release.send(()).expect("slow task waiting");
    assert!(wait_until(|| old.done()));
    assert!(!late_accepted.load(Ordering::SeqCst));

    // A subscription round trip means the worker has drained the queue
    server.connect(SubscriberId(1), "t");
    assert!(wait_until(|| server.subscriber_count("t") == 1));
    assert_eq!(server.value("t").as_deref(), Some(&CellValue::Int(2)));
}

#[test]
fn concurrent_equal_requests_start_one_task() {
    let bridge = Arc::new(bridge());
    for round in 0..50 {
        let starts = Arc::new(AtomicUsize::new(0));
        let topic = format!("calc{round}");
        let gate = Arc::new(Barrier::new(8));

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                let starts = Arc::clone(&starts);
                let gate = Arc::clone(&gate);
                let topic = topic.clone();
                thread::spawn(move || {
                    gate.wait();
                    bridge.request(&topic, doubler(starts, 3)).expect("request");
                })
            })
            .collect();
        for caller in callers {
            caller.join().expect("caller thread");
        }

        assert!(wait_until(|| starts.load(Ordering::SeqCst) >= 1));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(starts.load(Ordering::SeqCst), 1, "round {round}");
        assert!(bridge.is_tracking(&topic));
    }
}

#[test]
fn stopped_tasks_are_pruned() {
    let bridge = bridge();
    let starts = Arc::new(AtomicUsize::new(0));
    let server = Arc::clone(bridge.server());

    bridge.request("gone", doubler(starts.clone(), 1)).expect("request");
    bridge.request("kept", doubler(starts.clone(), 2)).expect("request");
    server.connect(SubscriberId(1), "gone");
    assert!(wait_until(|| server.subscriber_count("gone") == 1));

    server.disconnect(SubscriberId(1));
    assert!(wait_until(|| !server.has_topic("gone")));
    assert!(!bridge.is_tracking("gone"));
    assert_eq!(bridge.len(), 2);

    assert_eq!(bridge.prune(), 1);
    assert_eq!(bridge.len(), 1);
    assert!(bridge.is_tracking("kept"));
    assert_eq!(bridge.prune(), 0);
}
