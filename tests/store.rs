mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::init_tracing;
use dispatchlane::{ExecutionLane, GuardedStore, LaneBuilder, LaneError, LaneMode};

#[test]
fn empty_store_reads_none() {
    let store: GuardedStore<u32> = GuardedStore::new("empty").unwrap();

    assert_eq!(store.read().unwrap(), None);
    assert!(store.is_empty().unwrap());
    assert_eq!(store.len().unwrap(), 0);
    assert!(store.snapshot().unwrap().is_empty());
}

#[test]
fn read_after_back_to_back_writes_sees_the_last_one() {
    init_tracing();
    let store = GuardedStore::new("numbers").unwrap();

    store.write(1).unwrap();
    store.write(2).unwrap();
    store.write(3).unwrap();
    store.flush().unwrap();

    assert_eq!(store.read().unwrap(), Some(3));
    assert_eq!(store.snapshot().unwrap(), [1, 2, 3]);
}

#[test]
fn read_is_queued_behind_earlier_writes() {
    let store = GuardedStore::new("queued").unwrap();

    for n in 0..100 {
        store.write(n).unwrap();
    }

    // no flush: submission order alone puts the read after every write
    assert_eq!(store.read().unwrap(), Some(99));
    assert_eq!(store.len().unwrap(), 100);
}

#[derive(Debug)]
struct Rendezvous {
    meeting: Arc<Barrier>,
    value: &'static str,
}

impl Clone for Rendezvous {
    fn clone(&self) -> Self {
        // both reads have to be inside the store at the same time to get past this
        self.meeting.wait();
        Rendezvous {
            meeting: self.meeting.clone(),
            value: self.value,
        }
    }
}

#[test]
fn reads_do_not_block_each_other() {
    let lane = LaneBuilder::new("readers")
        .mode(LaneMode::Concurrent)
        .worker_threads(2)
        .build()
        .unwrap();
    let store = GuardedStore::with_lane(lane).unwrap();
    store
        .write(Rendezvous {
            meeting: Arc::new(Barrier::new(2)),
            value: "hello",
        })
        .unwrap();
    store.flush().unwrap();

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| store.read().unwrap());
        let second = s.spawn(|| store.read().unwrap());
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(first.map(|r| r.value), Some("hello"));
    assert_eq!(second.map(|r| r.value), Some("hello"));
}

#[test]
fn writes_from_each_thread_apply_in_program_order() {
    let store = GuardedStore::new("program-order").unwrap();

    thread::scope(|s| {
        for writer in 0..4u32 {
            let store = &store;
            s.spawn(move || {
                for seq in 0..50u32 {
                    store.write((writer, seq)).unwrap();
                }
            });
        }
    });
    store.flush().unwrap();

    let items = store.snapshot().unwrap();
    assert_eq!(items.len(), 200);
    for writer in 0..4 {
        let seqs: Vec<u32> = items
            .iter()
            .filter(|(w, _)| *w == writer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn concurrent_readers_only_see_whole_writes() {
    let store = GuardedStore::new("isolation").unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for n in 0..200u64 {
                // every write is a block of identical values
                store.write(vec![n; 64]).unwrap();
            }
        });

        for _ in 0..3 {
            s.spawn(|| {
                let mut last_len = 0;
                for _ in 0..100 {
                    let items = store.snapshot().unwrap();
                    assert!(items.len() >= last_len);
                    last_len = items.len();

                    for (n, block) in items.iter().enumerate() {
                        assert_eq!(block.len(), 64);
                        assert!(block.iter().all(|v| *v == n as u64));
                    }
                }
            });
        }
    });

    store.flush().unwrap();
    assert_eq!(store.len().unwrap(), 200);
}

#[test]
fn serial_lane_is_rejected() {
    let lane = ExecutionLane::serial("not-concurrent").unwrap();

    let err = GuardedStore::<u8>::with_lane(lane).unwrap_err();
    assert!(matches!(err, LaneError::NotConcurrent { ref label } if label == "not-concurrent"));
}

#[test]
fn store_with_closed_lane_rejects_access() {
    let store = GuardedStore::new("closed").unwrap();
    store.write(1u8).unwrap();
    store.lane().shutdown();

    assert!(matches!(store.write(2), Err(LaneError::Closed { .. })));
    assert!(matches!(store.read(), Err(LaneError::Closed { .. })));
    assert!(matches!(store.flush(), Err(LaneError::Closed { .. })));
}
