//! Counts events from many worker threads into per-partition counters, while
//! a reporter thread periodically takes a consistent snapshot of all of them.
//!
//! Run with `cargo run --example per_partition_counter`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lglock::LgLock;

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    events: u64,
    bytes: u64,
}

fn main() {
    const WORKERS: usize = 8;
    const EVENTS: u64 = 100_000;

    let stats = Arc::new(LgLock::builder("stats").build::<Stats>());
    let done = Arc::new(AtomicBool::new(false));
    println!("{} partitions", stats.partitions());

    let reporter = thread::spawn({
        let (stats, done) = (Arc::clone(&stats), Arc::clone(&done));
        move || {
            while !done.load(Ordering::Relaxed) {
                let (events, bytes) = stats.global_lock_then(|guard| {
                    guard.iter().fold((0, 0), |(e, b), s| (e + s.events, b + s.bytes))
                });
                println!("snapshot: {events} events, {bytes} bytes");
                thread::sleep(Duration::from_millis(10));
            }
        }
    });

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for event in 0..EVENTS {
                    let mut guard = stats.local_lock();
                    guard.events += 1;
                    guard.bytes += (worker as u64 + event) % 64;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    reporter.join().unwrap();

    let per_partition = Arc::try_unwrap(stats).ok().map(LgLock::into_inner).unwrap_or_default();
    for (id, stats) in per_partition.iter().enumerate() {
        println!("partition {id}: {stats:?}");
    }
    let total: u64 = per_partition.iter().map(|stats| stats.events).sum();
    assert_eq!(total, WORKERS as u64 * EVENTS);
    println!("total: {total} events");
}
