#![cfg(feature = "std")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use lglock::observer::OrderValidator;
use lglock::primitive::yields;
use lglock::sched::{Fixed, ThreadScheduler};
use lglock::{Error, LgLock};

#[test]
fn local_sections_on_distinct_partitions_run_in_parallel() {
    let lock = Arc::new(LgLock::builder("parallel").partitions(2).build::<u32>());
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|id| {
            let (lock, barrier) = (Arc::clone(&lock), Arc::clone(&barrier));
            thread::spawn(move || {
                lock.scheduler().migrate(id);
                let mut guard = lock.local_lock();
                assert_eq!(guard.id(), id);
                // Both threads hold their partition at the same time.
                barrier.wait();
                *guard += 1;
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.global_lock().iter().sum::<u32>(), 2);
}

#[test]
fn local_section_blocks_global_until_released() {
    let lock = Arc::new(LgLock::builder("blocks").partitions(4).build::<u32>());
    let released = Arc::new(AtomicBool::new(false));

    lock.scheduler().migrate(2);
    let mut guard = lock.local_lock();
    assert_eq!(guard.id(), 2);
    *guard += 1;

    let (c_lock, c_released) = (Arc::clone(&lock), Arc::clone(&released));
    let global = thread::spawn(move || {
        let guard = c_lock.global_lock();
        assert!(c_released.load(Ordering::SeqCst));
        assert!((0..4).all(|id| c_lock.is_locked(id)));
        guard[2]
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!global.is_finished());
    released.store(true, Ordering::SeqCst);
    drop(guard);
    assert_eq!(global.join().unwrap(), 1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Acquirer {
    Local(usize),
    LocalOn(usize),
    Double(usize, usize),
}

#[test]
fn global_section_blocks_every_local() {
    const N: usize = 3;
    let lock = Arc::new(LgLock::builder("excludes").partitions(N).build::<u32>());
    let guard = lock.global_lock();

    let acquirers: Vec<_> = (0..N)
        .flat_map(|id| {
            [Acquirer::Local(id), Acquirer::LocalOn(id), Acquirer::Double(id, (id + 1) % N)]
        })
        .collect();
    let (tx, rx) = channel();
    for &acquirer in &acquirers {
        let (c_lock, c_tx) = (Arc::clone(&lock), tx.clone());
        thread::spawn(move || {
            match acquirer {
                Acquirer::Local(id) => {
                    c_lock.scheduler().migrate(id);
                    let mut guard = c_lock.local_lock();
                    assert_eq!(guard.id(), id);
                    *guard += 1;
                }
                Acquirer::LocalOn(id) => *c_lock.local_lock_on(id) += 1,
                Acquirer::Double(a, b) => *c_lock.double_lock(a, b).get_mut(a) += 1,
            }
            c_tx.send(acquirer).unwrap();
        });
    }
    drop(tx);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(guard);

    let mut done: Vec<_> = rx.iter().collect();
    done.sort_unstable();
    let mut expected = acquirers;
    expected.sort_unstable();
    assert_eq!(done, expected);
    assert_eq!(lock.global_lock().iter().sum::<u32>(), 3 * N as u32);
}

#[test]
fn crossing_double_locks_do_not_deadlock() {
    let lock = Arc::new(
        LgLock::builder("crossing")
            .partitions(4)
            .primitive::<yields::McsLock>()
            .build_with(|_| 1_000_u32),
    );
    let handles: Vec<_> = [(3, 1), (1, 3)]
        .into_iter()
        .map(|(from, to)| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = lock.double_lock(from, to);
                    let (from, to) = guard.pair_mut();
                    *from -= 1;
                    *to += 1;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let guard = lock.global_lock();
    assert_eq!((guard[1], guard[3]), (1_000, 1_000));
}

#[test]
fn double_lock_ring_of_partitions() {
    const N: usize = 4;
    let lock = Arc::new(LgLock::builder("ring").partitions(N).build_with(|_| 500_u32));
    let handles: Vec<_> = (0..N)
        .map(|i| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..500 {
                    let mut guard = lock.double_lock(i, (i + 1) % N);
                    let (from, to) = guard.pair_mut();
                    *from -= 1;
                    *to += 1;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(Arc::try_unwrap(lock).ok().unwrap().into_inner(), [500; N]);
}

#[test]
#[should_panic(expected = "partition 5 is out of range")]
fn local_lock_on_out_of_range() {
    let lock = LgLock::builder("range").partitions(4).build::<u32>();
    let _guard = lock.local_lock_on(5);
}

#[test]
#[should_panic(expected = "double_lock needs two distinct partitions")]
fn double_lock_same_partition() {
    let lock = LgLock::builder("same").partitions(4).build::<u32>();
    let _guard = lock.double_lock(1, 1);
}

#[test]
fn zero_partitions() {
    let result = LgLock::builder("zero").partitions(0).try_build::<u32>();
    assert!(matches!(result, Err(Error::NoPartitions)));
}

#[test]
fn every_mode_round_trip() {
    let lock = LgLock::builder("round_trip").partitions(4).scheduler(Fixed(1)).build::<u32>();
    for _ in 0..3 {
        *lock.local_lock() += 1;
        *lock.local_lock_on(2) += 1;
        *lock.double_lock(3, 0).get_mut(3) += 1;
        lock.global_lock()[0] += 1;
    }
    assert!((0..4).all(|id| !lock.is_locked(id)));
    assert_eq!(lock.into_inner(), [3, 3, 3, 3]);
}

#[test]
fn thread_scheduler_balances_depths() {
    let lock = LgLock::builder("depths").partitions(2).build::<u32>();
    thread::scope(|s| {
        s.spawn(|| {
            let local = lock.local_lock();
            assert_eq!(ThreadScheduler::pin_count(), 1);
            assert_eq!(ThreadScheduler::preempt_count(), 0);
            drop(local);
            let explicit = lock.local_lock_on(1);
            assert_eq!(ThreadScheduler::pin_count(), 0);
            assert_eq!(ThreadScheduler::preempt_count(), 1);
            drop(explicit);
            let global = lock.global_lock();
            assert_eq!(ThreadScheduler::preempt_count(), 1);
            drop(global);
            assert_eq!(ThreadScheduler::pin_count(), 0);
            assert_eq!(ThreadScheduler::preempt_count(), 0);
        });
    });
}

#[test]
#[should_panic(expected = "cannot migrate a pinned thread")]
fn pinned_thread_cannot_migrate() {
    let lock = LgLock::builder("pinned").partitions(2).build::<u32>();
    let _guard = lock.local_lock();
    lock.scheduler().migrate(0);
}

#[test]
fn validator_detects_inversion_between_lglocks() {
    let validator = Arc::new(OrderValidator::new());
    let first = LgLock::builder("first")
        .partitions(2)
        .observer(Arc::clone(&validator))
        .build::<u32>();
    let second = LgLock::builder("second")
        .partitions(2)
        .observer(Arc::clone(&validator))
        .build::<u32>();

    {
        let _outer = first.local_lock_on(0);
        let _inner = second.global_lock();
    }

    let result = thread::scope(|s| {
        s.spawn(|| {
            let _outer = second.local_lock_on(1);
            let _inner = first.local_lock_on(1);
        })
        .join()
    });
    assert!(result.is_err());
    assert!((0..2).all(|id| !first.is_locked(id) && !second.is_locked(id)));
}
