use eventloop::EventLoop;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// If start() returns within this range, we say it returned immediately.
/// Generous to avoid flakes on slow machines.
const TIME_THRESHOLD: Duration = Duration::from_millis(300);

#[test]
fn stop_before_start_cancels_the_next_start() {
    let mut event_loop = EventLoop::new().expect("create event loop");

    event_loop.stop();
    let start_time = Instant::now();
    event_loop.start();

    assert!(
        start_time.elapsed() < TIME_THRESHOLD,
        "start after a pending stop must return immediately"
    );
}

#[test]
fn pending_callbacks_all_run_in_the_first_iteration() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let called = Rc::new(Cell::new(0));

    for _ in 0..10 {
        let called = called.clone();
        event_loop.add_callback(move |event_loop| {
            called.set(called.get() + 1);
            event_loop.stop();
        });
    }

    let start_time = Instant::now();
    event_loop.start();

    assert_eq!(called.get(), 10);
    assert!(start_time.elapsed() < TIME_THRESHOLD);
}

#[test]
fn behaviorally_identical_callbacks_are_distinct() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let called = Rc::new(Cell::new(0));

    // Two registrations with the same body must both run; there is no
    // value-equality dedup.
    for _ in 0..2 {
        let called = called.clone();
        event_loop.add_callback(move |event_loop| {
            called.set(called.get() + 1);
            event_loop.stop();
        });
    }

    event_loop.start();
    assert_eq!(called.get(), 2);
}

#[test]
fn removed_callbacks_never_run() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let called = Rc::new(Cell::new(0));

    let mut ids = Vec::new();
    for _ in 0..10 {
        let called = called.clone();
        ids.push(event_loop.add_callback(move |event_loop| {
            called.set(called.get() + 1);
            event_loop.stop();
        }));
    }

    for id in &ids[..5] {
        event_loop.remove_callback(*id);
    }

    event_loop.start();
    assert_eq!(called.get(), 5);
}

fn tick(event_loop: &mut EventLoop, ticks: Rc<Cell<u32>>) {
    ticks.set(ticks.get() + 1);
    let next = ticks.clone();
    event_loop.add_callback(move |event_loop| tick(event_loop, next));
}

#[test]
fn self_readding_callback_runs_once_per_iteration() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let ticks = Rc::new(Cell::new(0));

    let first = ticks.clone();
    event_loop.add_callback(move |event_loop| tick(event_loop, first));

    // Registered after the ticker, so it observes how often the ticker ran
    // within the same iteration.
    let observed = ticks.clone();
    event_loop.add_callback(move |event_loop| {
        assert_eq!(
            observed.get(),
            1,
            "re-added callback must not run again within its own iteration"
        );

        let observed = observed.clone();
        event_loop.add_callback(move |event_loop| {
            assert_eq!(
                observed.get(),
                2,
                "re-added callback must run exactly once in the next iteration"
            );
            event_loop.stop();
        });
    });

    event_loop.start();
    assert_eq!(ticks.get(), 2);
}

#[test]
fn due_time_events_all_fire_in_one_iteration() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let called = Rc::new(Cell::new(0));

    let now = Instant::now();
    for _ in 0..10 {
        let called = called.clone();
        event_loop.add_time_event(now, move |event_loop| {
            called.set(called.get() + 1);
            event_loop.stop();
        });
    }

    let start_time = Instant::now();
    event_loop.start();

    assert_eq!(
        called.get(),
        10,
        "every event due at or before now must fire without an intervening I/O wait"
    );
    assert!(start_time.elapsed() < TIME_THRESHOLD);
}

#[test]
fn removed_time_events_never_fire() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let called = Rc::new(Cell::new(0));

    let now = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..10 {
        let called = called.clone();
        ids.push(event_loop.add_time_event(now, move |event_loop| {
            called.set(called.get() + 1);
            event_loop.stop();
        }));
    }

    for id in &ids[..5] {
        event_loop.remove_time_event(*id);
    }

    event_loop.start();
    assert_eq!(called.get(), 5);
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let order = Rc::new(RefCell::new(Vec::new()));

    let deadline = Instant::now();
    for index in 0..5 {
        let order = order.clone();
        event_loop.add_time_event(deadline, move |event_loop| {
            order.borrow_mut().push(index);
            if index == 4 {
                event_loop.stop();
            }
        });
    }

    event_loop.start();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn wait_is_clamped_to_the_nearest_deadline() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let start_time = Instant::now();
    event_loop.add_time_event(start_time + Duration::from_millis(50), move |event_loop| {
        flag.set(true);
        event_loop.stop();
    });

    event_loop.start();
    let elapsed = start_time.elapsed();

    assert!(fired.get());
    assert!(
        elapsed >= Duration::from_millis(50),
        "timer must not fire before its deadline"
    );
    assert!(
        elapsed < EventLoop::DEFAULT_POLL_TIMEOUT,
        "the wait must shrink to the timer deadline instead of the default timeout"
    );
}

#[test]
fn cross_thread_callback_interrupts_a_blocked_wait() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let handle = event_loop.handle();
    let called = Arc::new(AtomicBool::new(false));

    let flag = called.clone();
    let submitter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.add_callback(move |event_loop| {
            flag.store(true, Ordering::SeqCst);
            event_loop.stop();
        });
    });

    let start_time = Instant::now();
    event_loop.start();
    let elapsed = start_time.elapsed();

    submitter.join().expect("join submitter thread");
    assert!(called.load(Ordering::SeqCst));
    assert!(
        elapsed < Duration::from_millis(1000),
        "submission must wake the blocked wait instead of riding out the full timeout"
    );
}

#[test]
fn cross_thread_stop_interrupts_a_blocked_wait() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let handle = event_loop.handle();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();
    });

    let start_time = Instant::now();
    event_loop.start();
    let elapsed = start_time.elapsed();

    stopper.join().expect("join stopper thread");
    assert!(
        elapsed < Duration::from_millis(1000),
        "stop must wake the blocked wait"
    );
}

#[test]
fn cross_thread_time_event_can_be_removed_before_it_fires() {
    let mut event_loop = EventLoop::new().expect("create event loop");
    let handle = event_loop.handle();
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    let id = handle.add_time_event(
        Instant::now() + Duration::from_millis(100),
        move |_event_loop| {
            flag.store(true, Ordering::SeqCst);
        },
    );
    handle.remove_time_event(id);
    handle.add_time_event(
        Instant::now() + Duration::from_millis(200),
        |event_loop| event_loop.stop(),
    );

    event_loop.start();
    assert!(
        !fired.load(Ordering::SeqCst),
        "a time event removed before polling must never fire"
    );
}
