//! End-to-end scenarios driving real Frames through a `PoolScheduler`.
//!
//! Unlike the unit tests embedded in each module, these exercise the full
//! registry/scheduler/connector/spindown stack together, the way a reactor
//! actually runs.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reactor_core::{
    Channel, FrameBuilder, FrameError, LifecycleEvent, PoolScheduler, ReactorSystem, SpindownConfig,
};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn system() -> Arc<ReactorSystem> {
    init_tracing();
    ReactorSystem::new(PoolScheduler::start(4, 64))
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// Scenario 1: ordered delivery, self-seal from within the handler, and an
// exactly-once ReactorTerminated once the non-daemon connector count and
// pending ring both drain to zero.
#[test]
fn scenario_ordered_delivery_then_seal_terminates() {
    let system = system();
    let frame = FrameBuilder::new("scenario-1", Box::new(|_| Box::new(()))).spawn(&system);

    let terminated_count = Arc::new(AtomicUsize::new(0));
    let tc = Arc::clone(&terminated_count);
    frame.sys_emitter().subscribe(move |ev| {
        if matches!(ev, LifecycleEvent::ReactorTerminated) {
            tc.fetch_add(1, Ordering::SeqCst);
        }
    });

    let collected = Arc::new(Mutex::new(Vec::new()));
    let collected2 = Arc::clone(&collected);
    let self_handle: Arc<Mutex<Option<std::sync::Weak<reactor_core::Connector<i32>>>>> =
        Arc::new(Mutex::new(None));
    let self_handle2 = Arc::clone(&self_handle);
    let frame_for_handler = Arc::clone(&frame);

    let connector = frame
        .open_connector::<i32, _>(None, false, true, move |x| {
            let mut v = collected2.lock().unwrap();
            v.push(x);
            if v.len() == 3 {
                if let Some(c) = self_handle2.lock().unwrap().clone().and_then(|w| w.upgrade()) {
                    frame_for_handler.seal_connector(&c);
                }
            }
        })
        .unwrap();
    *self_handle.lock().unwrap() = Some(Arc::downgrade(&connector));

    let channel = connector.channel();
    channel.send(1).unwrap();
    channel.send(2).unwrap();
    channel.send(3).unwrap();

    assert!(wait_until(Duration::from_secs(2), || frame.has_terminated()));
    assert_eq!(*collected.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(terminated_count.load(Ordering::SeqCst), 1);
}

// Scenario 2: two producers, 10,000 tagged events each, one connector.
// Every producer's own subsequence must arrive strictly increasing, and the
// total delivered count must be exactly 20,000.
#[test]
fn scenario_two_producers_fifo_per_producer() {
    let system = system();
    let frame = FrameBuilder::new("scenario-2", Box::new(|_| Box::new(()))).spawn(&system);

    let collected: Arc<Mutex<Vec<(u8, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let collected2 = Arc::clone(&collected);
    let connector = frame
        .open_connector::<(u8, u32), _>(None, true, true, move |(producer, seq)| {
            collected2.lock().unwrap().push((producer, seq));
        })
        .unwrap();

    let channel = connector.channel();
    let mut handles = Vec::new();
    for producer in 0u8..2 {
        let channel = channel.clone();
        handles.push(std::thread::spawn(move || {
            for seq in 0u32..10_000 {
                channel.send((producer, seq)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        collected.lock().unwrap().len() == 20_000
    }));

    let log = collected.lock().unwrap();
    for producer in 0u8..2 {
        let mut last: Option<u32> = None;
        for &(p, seq) in log.iter().filter(|(p, _)| *p == producer) {
            if let Some(prev) = last {
                assert!(seq > prev, "producer {} delivered out of order", producer);
            }
            last = Some(seq);
        }
        assert_eq!(last, Some(9_999));
    }
}

// Scenario 3: a throwable inside the first event handler recovers at the
// Frame boundary: ReactorStarted, ReactorScheduled, ReactorDied, then
// ReactorTerminated, with no ReactorPreempted in between, and the registry
// slot released afterward.
#[test]
fn scenario_panic_in_handler_terminates_and_releases() {
    let system = system();
    let frame = FrameBuilder::new("scenario-3", Box::new(|_| Box::new(()))).spawn(&system);

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let events2 = Arc::clone(&events);
    frame.sys_emitter().subscribe(move |ev| {
        events2.lock().unwrap().push(ev.to_string());
    });

    let connector = frame
        .open_connector::<i32, _>(Some("boom".into()), false, true, |_| {
            panic!("reactor exploded");
        })
        .unwrap();

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    connector.channel().send(1).unwrap();
    assert!(wait_until(Duration::from_secs(2), || frame.has_terminated()));
    std::panic::set_hook(prev_hook);

    assert!(wait_until(Duration::from_secs(2), || {
        system.registry().for_name("scenario-3").is_none()
    }));

    let log = events.lock().unwrap();
    let started = log.iter().position(|e| e == "ReactorStarted").unwrap();
    let scheduled = log.iter().position(|e| e == "ReactorScheduled").unwrap();
    let died = log.iter().position(|e| e.starts_with("ReactorDied")).unwrap();
    let terminated = log.iter().position(|e| e == "ReactorTerminated").unwrap();
    assert!(started < scheduled && scheduled < died && died < terminated);
    assert!(
        !log[scheduled..=died].iter().any(|e| e == "ReactorPreempted"),
        "no ReactorPreempted between Scheduled and Died: {:?}",
        log
    );
}

// Scenario 4: a duplicate connector name is rejected, and the first
// connector remains fully functional afterward.
#[test]
fn scenario_duplicate_connector_name_rejected() {
    let system = system();
    let frame = FrameBuilder::new("scenario-4", Box::new(|_| Box::new(()))).spawn(&system);

    let received = Arc::new(AtomicUsize::new(0));
    let received2 = Arc::clone(&received);
    let first = frame
        .open_connector::<i32, _>(Some("foo".into()), false, true, move |_| {
            received2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let err = frame
        .open_connector::<i32, _>(Some("foo".into()), false, true, |_| {})
        .unwrap_err();
    assert_eq!(err, FrameError::NameInUse("foo".to_string()));

    first.channel().send(1).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        received.load(Ordering::SeqCst) == 1
    }));
}

// Scenario 5: a listener registered for a name before any connector of that
// name exists receives exactly one channel once the connector opens.
#[test]
fn scenario_listener_before_connector_exists() {
    let system = system();
    let frame = FrameBuilder::new("scenario-5", Box::new(|_| Box::new(()))).spawn(&system);

    let rx: crossbeam_channel::Receiver<Channel<String>> = frame.listen_for("bar");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = Arc::clone(&received);
    let connector = frame
        .open_connector::<String, _>(Some("bar".into()), false, true, move |s| {
            received2.lock().unwrap().push(s);
        })
        .unwrap();

    let channel = rx.recv_timeout(Duration::from_secs(2)).expect("listener must receive a channel");
    assert!(rx.try_recv().is_err(), "listener must receive exactly one channel");
    assert_eq!(channel.name(), connector.name());

    channel.send("hello".to_string()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        received.lock().unwrap().len() == 1
    }));
}

// Scenario 6: with the configured ramp, a stream of isolated single events
// decays spindown toward the floor; a stream with reliable quick follow-ups
// keeps it above the initial value. Mirrors the unit-level formula test in
// spindown.rs, but drives it through real batches instead of calling the
// controller directly.
#[test]
fn scenario_spindown_tracks_follow_up_reliability() {
    let cfg = SpindownConfig {
        spindown_initial: 16,
        spindown_min: 4,
        spindown_max: 64,
        spindown_mutation_rate: 1.0,
        spindown_test_threshold: 1,
        spindown_test_iterations: 1,
        spindown_cooldown_rate: 4,
    };

    let system1 = system();
    let frame = FrameBuilder::new("scenario-6-idle", Box::new(|_| Box::new(())))
        .spindown_config(cfg)
        .spawn(&system1);
    let connector = frame.open_connector::<i32, _>(None, true, true, |_| {}).unwrap();
    for i in 0..300 {
        connector.channel().send(i).unwrap();
        std::thread::sleep(Duration::from_micros(200));
    }
    assert!(wait_until(Duration::from_secs(5), || {
        frame.estimate_total_pending_events() == 0
    }));
    assert!(frame.current_spindown() >= cfg.spindown_min);
    assert!(frame.current_spindown() <= cfg.spindown_min + 4);

    let system2 = system();
    let frame2 = FrameBuilder::new("scenario-6-bursty", Box::new(|_| Box::new(())))
        .spindown_config(cfg)
        .spawn(&system2);
    let counter = Arc::new(AtomicUsize::new(0));
    let counter2 = Arc::clone(&counter);
    let connector2 = frame2
        .open_connector::<i32, _>(None, true, true, move |_| {
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    for i in 0..300 {
        connector2.channel().send(i).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || {
        counter.load(Ordering::SeqCst) == 300
    }));
    assert!(frame2.current_spindown() > cfg.spindown_initial);
}

// Quantified property: isolation. No two threads ever observe a Frame's
// batch running concurrently, verified by a guard counter incremented and
// decremented from inside the handler.
#[test]
fn property_isolation_holds_under_concurrent_producers() {
    let system = system();
    let frame = FrameBuilder::new("prop-isolation", Box::new(|_| Box::new(()))).spawn(&system);

    let inside = Arc::new(AtomicI64::new(0));
    let max_seen = Arc::new(AtomicI64::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let inside2 = Arc::clone(&inside);
    let max2 = Arc::clone(&max_seen);
    let total2 = Arc::clone(&total);
    let connector = frame
        .open_connector::<i32, _>(None, true, true, move |_| {
            let n = inside2.fetch_add(1, Ordering::SeqCst) + 1;
            max2.fetch_max(n, Ordering::SeqCst);
            std::thread::yield_now();
            inside2.fetch_sub(1, Ordering::SeqCst);
            total2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let channel = connector.channel();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let channel = channel.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..200 {
                channel.send(i).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        total.load(Ordering::SeqCst) == 1600
    }));
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

// Quantified property: pending membership. A connector is estimated as
// pending iff it holds events and isn't sealed; once fully drained and
// sealed, the Frame reports no pending events.
#[test]
fn property_pending_membership_tracks_queue_state() {
    let system = system();
    let frame = FrameBuilder::new("prop-pending", Box::new(|_| Box::new(()))).spawn(&system);
    let connector = frame.open_connector::<i32, _>(None, true, true, |_| {}).unwrap();

    assert!(!frame.has_pending_events());
    connector.channel().send(1).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !frame.has_pending_events()));
}

// Quantified property: idempotent seal. Sealing twice from the handler's own
// thread is a no-op the second time, and the connector stays sealed.
#[test]
fn property_idempotent_seal() {
    let system = system();
    let frame = FrameBuilder::new("prop-seal", Box::new(|_| Box::new(()))).spawn(&system);

    let sealed_twice = Arc::new(AtomicBool::new(false));
    let sealed_twice2 = Arc::clone(&sealed_twice);
    let self_handle: Arc<Mutex<Option<std::sync::Weak<reactor_core::Connector<i32>>>>> =
        Arc::new(Mutex::new(None));
    let self_handle2 = Arc::clone(&self_handle);
    let frame_for_handler = Arc::clone(&frame);
    let connector = frame
        .open_connector::<i32, _>(None, false, true, move |_| {
            if let Some(c) = self_handle2.lock().unwrap().clone().and_then(|w| w.upgrade()) {
                frame_for_handler.seal_connector(&c);
                frame_for_handler.seal_connector(&c);
                sealed_twice2.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();
    *self_handle.lock().unwrap() = Some(Arc::downgrade(&connector));

    connector.channel().send(1).unwrap();
    assert!(wait_until(Duration::from_secs(2), || sealed_twice.load(Ordering::SeqCst)));
    assert!(connector.is_sealed());
}

// Quantified property: no-lost-schedule. A connector that gains events while
// the Frame is idle always eventually runs a batch, without any manual
// `activate` nudge from the caller.
#[test]
fn property_no_lost_schedule() {
    let system = system();
    let frame = FrameBuilder::new("prop-schedule", Box::new(|_| Box::new(()))).spawn(&system);

    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = Arc::clone(&seen);
    let connector = frame.open_connector::<i32, _>(None, true, true, move |_| {
        seen2.fetch_add(1, Ordering::SeqCst);
    }).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    connector.channel().send(42).unwrap();
    assert!(wait_until(Duration::from_secs(2), || seen.load(Ordering::SeqCst) == 1));
}
