mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{init_tracing, EventLog};
use dispatchlane::{CompletionCoordinator, CompletionError, ExecutionLane};
use proptest::prelude::*;

#[test]
fn wait_returns_immediately_when_nothing_is_outstanding() {
    let group = CompletionCoordinator::new();
    group.wait();
    group.wait();
    assert_eq!(group.outstanding(), 0);
}

#[test]
fn two_timed_tasks_finish_in_delay_order() {
    init_tracing();
    let lane = ExecutionLane::concurrent("long-running").unwrap();
    let group = Arc::new(CompletionCoordinator::new());
    let done = EventLog::default();
    let began = Instant::now();

    for (label, delay) in [("Task1", 30), ("Task2", 90)] {
        group.enter();
        let group = group.clone();
        let done = done.clone();
        lane.submit(move || {
            thread::sleep(Duration::from_millis(delay));
            done.push(label);
            group.leave();
        })
        .unwrap();
    }

    group.wait();

    assert!(began.elapsed() >= Duration::from_millis(90));
    assert_eq!(done.events(), ["Task1", "Task2"]);
}

#[test]
fn wait_blocks_until_the_last_leave() {
    let group = Arc::new(CompletionCoordinator::new());
    let released = Arc::new(AtomicBool::new(false));

    for _ in 0..3 {
        group.enter();
    }

    let waiter = {
        let group = group.clone();
        let released = released.clone();
        thread::spawn(move || {
            group.wait();
            released.store(true, Ordering::SeqCst);
        })
    };

    assert!(!group.leave());
    assert!(!group.leave());
    thread::sleep(Duration::from_millis(50));
    assert!(!released.load(Ordering::SeqCst));

    assert!(group.leave());
    waiter.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn every_waiter_is_released_together() {
    let group = Arc::new(CompletionCoordinator::new());
    let (tx, rx) = mpsc::channel();
    group.enter();

    for n in 0..4 {
        let group = group.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            group.wait();
            tx.send(n).unwrap();
        });
    }

    thread::sleep(Duration::from_millis(30));
    assert!(rx.try_recv().is_err());

    group.leave();

    let mut released: Vec<_> = (0..4)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    released.sort_unstable();
    assert_eq!(released, [0, 1, 2, 3]);
}

#[test]
fn waiters_are_released_even_if_a_new_round_enters_right_away() {
    let group = Arc::new(CompletionCoordinator::new());
    let (tx, rx) = mpsc::channel();
    group.enter();

    for _ in 0..3 {
        let group = group.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            group.wait();
            tx.send(()).unwrap();
        });
    }

    // let the waiters park before draining
    thread::sleep(Duration::from_millis(30));
    group.leave();
    group.enter();

    for _ in 0..3 {
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    assert_eq!(group.outstanding(), 1);
    group.leave();
}

#[test]
fn coordinator_is_reusable_across_rounds() {
    let lane = ExecutionLane::concurrent("rounds").unwrap();
    let group = Arc::new(CompletionCoordinator::new());

    for round in 0..3 {
        let log = EventLog::default();
        for n in 0..5 {
            let log = log.clone();
            lane.submit_tracked(&group, move || log.push(format!("{}-{}", round, n)))
                .unwrap();
        }
        group.wait();
        assert_eq!(log.events().len(), 5);
        assert_eq!(group.outstanding(), 0);
    }
}

#[test]
fn unmatched_leave_is_reported_immediately() {
    let group = CompletionCoordinator::new();

    assert_eq!(group.try_leave(), Err(CompletionError::Imbalanced));
    assert_eq!(group.outstanding(), 0);

    // the counter did not go negative, so a normal round still balances
    group.enter();
    assert_eq!(group.try_leave(), Ok(true));
    group.wait();
}

#[test]
#[should_panic(expected = "leave called without a matching enter")]
fn unmatched_leave_panics() {
    init_tracing();
    let group = CompletionCoordinator::new();
    group.leave();
}

#[test]
fn guard_leaves_on_drop() {
    let group = CompletionCoordinator::new();

    thread::scope(|s| {
        for n in 0..4 {
            let guard = group.guard();
            s.spawn(move || {
                let _guard = guard;
                thread::sleep(Duration::from_millis(5 * n));
            });
        }

        group.wait();
        assert_eq!(group.outstanding(), 0);
    });
}

#[test]
fn guard_leaves_when_the_task_panics() {
    let group = CompletionCoordinator::new();

    thread::scope(|s| {
        let guard = group.guard();
        let task = s.spawn(move || {
            let _guard = guard;
            panic!("task failure");
        });
        assert!(task.join().is_err());
    });

    assert_eq!(group.outstanding(), 0);
    group.wait();
}

#[test]
fn next_round_waits_for_its_own_tasks() {
    let group = Arc::new(CompletionCoordinator::new());

    group.enter();
    {
        let group = group.clone();
        thread::spawn(move || {
            group.leave();
        });
    }
    while group.outstanding() != 0 {
        thread::yield_now();
    }
    group.wait();

    // round two starts right after round one drained
    let task_left = Arc::new(AtomicBool::new(false));
    group.enter();
    {
        let group = group.clone();
        let task_left = task_left.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            task_left.store(true, Ordering::SeqCst);
            group.leave();
        });
    }
    group.wait();

    assert!(task_left.load(Ordering::SeqCst));
    assert_eq!(group.outstanding(), 0);
}

#[test]
fn guard_dropped_after_a_stray_leave_panics() {
    init_tracing();
    let group = CompletionCoordinator::new();
    let guard = group.guard();

    // the stray leave takes the guard's slot, so the guard is the one to find the imbalance
    assert!(group.leave());

    let dropped = panic::catch_unwind(AssertUnwindSafe(|| drop(guard)));
    let payload = dropped.unwrap_err();
    assert_eq!(
        payload.downcast_ref::<String>().map(String::as_str),
        Some("leave called without a matching enter")
    );
    assert_eq!(group.outstanding(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn balanced_enters_and_leaves_release_wait(tasks in 1usize..24, threads in 1usize..5) {
        let group = CompletionCoordinator::new();
        for _ in 0..tasks {
            group.enter();
        }

        thread::scope(|s| {
            for t in 0..threads {
                let group = &group;
                let share = (t..tasks).step_by(threads).count();
                s.spawn(move || {
                    for _ in 0..share {
                        group.leave();
                    }
                });
            }
            group.wait();
        });

        prop_assert_eq!(group.outstanding(), 0);
        prop_assert_eq!(group.try_leave(), Err(CompletionError::Imbalanced));
    }

    #[test]
    fn wait_holds_while_any_leave_is_missing(tasks in 2usize..16) {
        let group = CompletionCoordinator::new();
        for _ in 0..tasks {
            group.enter();
        }
        for _ in 0..tasks - 1 {
            group.leave();
        }

        prop_assert_eq!(group.outstanding(), 1);

        let released = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                group.wait();
                released.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(5));
            assert!(!released.load(Ordering::SeqCst));
            group.leave();
        });

        prop_assert!(released.load(Ordering::SeqCst));
    }
}
