use core::cell::{Cell, RefCell, UnsafeCell};
use std::vec::Vec;

use crate::observer::{LockKey, Observer};
use crate::primitive::Primitive;
use crate::sched::Scheduler;

/// An arbitrary unsigned integer type.
pub type Int = u32;

/// A shared integer protected by a bare primitive.
pub struct Counter<P> {
    raw: P,
    value: UnsafeCell<Int>,
}

// SAFETY: `value` is only accessed while `raw` is held.
unsafe impl<P: Sync> Sync for Counter<P> {}

impl<P: Primitive> Counter<P> {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self { raw: P::new(), value: UnsafeCell::new(0) }
    }

    /// Increments the counter under the primitive.
    pub fn inc(&self) {
        self.raw.lock();
        // SAFETY: We hold the primitive.
        unsafe {
            *self.value.get() += 1;
            self.raw.unlock();
        }
    }

    /// Reads the counter under the primitive.
    pub fn get(&self) -> Int {
        self.raw.lock();
        // SAFETY: We hold the primitive.
        unsafe {
            let value = *self.value.get();
            self.raw.unlock();
            value
        }
    }
}

/// A service call seen by a [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Pin,
    Unpin,
    PreemptDisable,
    PreemptEnable,
    BeginShared,
    BeginExclusive,
    End,
}

/// A single threaded scheduler and observer that records every call it
/// receives, in order.
///
/// Pass it by reference as both the scheduler and the observer of a lock to
/// get one combined trace.
#[derive(Debug, Default)]
pub struct Recorder {
    home: Cell<usize>,
    events: RefCell<Vec<Event>>,
}

impl Recorder {
    /// Creates a recorder whose context lives on partition `home`.
    pub fn at(home: usize) -> Self {
        Self { home: Cell::new(home), events: RefCell::default() }
    }

    /// Moves the recorded context to partition `home`.
    pub fn set_home(&self, home: usize) {
        self.home.set(home);
    }

    /// Returns the events recorded since the last call.
    pub fn take(&self) -> Vec<Event> {
        self.events.take()
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Scheduler for Recorder {
    fn current(&self) -> usize {
        self.home.get()
    }

    fn pin(&self) {
        self.push(Event::Pin);
    }

    fn unpin(&self) {
        self.push(Event::Unpin);
    }

    fn preempt_disable(&self) {
        self.push(Event::PreemptDisable);
    }

    fn preempt_enable(&self) {
        self.push(Event::PreemptEnable);
    }
}

impl Observer for Recorder {
    fn begin_shared(&self, _key: &LockKey) {
        self.push(Event::BeginShared);
    }

    fn begin_exclusive(&self, _key: &LockKey) {
        self.push(Event::BeginExclusive);
    }

    fn end(&self, _key: &LockKey) {
        self.push(Event::End);
    }
}

#[cfg(all(not(loom), test))]
pub mod tests {
    // Some of these tests are modified from the Rust's Mutex test suite, to
    // exercise partitions instead of a single mutex.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::{Counter, Int};
    use crate::primitive::Primitive;

    #[cfg(feature = "std")]
    pub use lglock::*;

    const ITERS: Int = 1000;
    const THREADS: Int = 4;
    const EXPECTED_VALUE: Int = ITERS * THREADS;

    pub fn lots_and_lots_primitive<P>()
    where
        P: Primitive + Send + Sync + 'static,
    {
        let counter = Arc::new(Counter::<P>::new());
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let c_counter = Arc::clone(&counter);
            let c_tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    c_counter.inc();
                }
                c_tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        assert_eq!(counter.get(), EXPECTED_VALUE);
    }

    pub fn smoke_primitive<P: Primitive>() {
        let raw = P::new();
        assert!(!raw.is_locked());
        raw.lock();
        assert!(raw.is_locked());
        unsafe { raw.unlock() };
        raw.lock();
        unsafe { raw.unlock() };
        assert!(!raw.is_locked());
    }

    #[cfg(feature = "std")]
    mod lglock {
        use std::format;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::mpsc::channel;
        use std::sync::Arc;
        use std::thread;
        use std::vec::Vec;

        use super::{Int, EXPECTED_VALUE, ITERS, THREADS};
        use crate::primitive::Primitive;
        use crate::sched::ThreadScheduler;
        use crate::LgLock;

        const PARTITIONS: usize = 4;

        /// A lock on the default thread scheduler, with `P` slots.
        type Lock<P, T> = LgLock<T, P, ThreadScheduler>;

        fn new_lock<P: Primitive, T: Default>(name: &'static str) -> Lock<P, T> {
            LgLock::builder(name).partitions(PARTITIONS).primitive::<P>().build()
        }

        fn join_all<F>(threads: usize, f: F)
        where
            F: Fn(usize) + Send + Sync + 'static,
        {
            let f = Arc::new(f);
            let (tx, rx) = channel();
            for t in 0..threads {
                let (c_f, c_tx) = (Arc::clone(&f), tx.clone());
                thread::spawn(move || {
                    c_f(t);
                    c_tx.send(()).unwrap();
                });
            }
            drop(tx);
            for _ in 0..threads {
                rx.recv().unwrap();
            }
        }

        #[derive(Debug, Default)]
        pub struct Pair {
            a: Int,
            b: Int,
        }

        pub struct Foo(Arc<AtomicUsize>);

        impl Drop for Foo {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        /// Local increments from many threads are never lost.
        pub fn lots_and_lots_local<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            let lock = Arc::new(new_lock::<P, Int>("lots_local"));
            let c_lock = Arc::clone(&lock);
            join_all(THREADS as usize, move |_| {
                for _ in 0..ITERS {
                    *c_lock.local_lock() += 1;
                }
            });
            let total: Int = lock.global_lock().iter().sum();
            assert_eq!(total, EXPECTED_VALUE);
        }

        /// Explicit increments spread over every partition are never lost.
        pub fn lots_and_lots_local_on<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            let lock = Arc::new(new_lock::<P, Int>("lots_local_on"));
            let c_lock = Arc::clone(&lock);
            join_all(THREADS as usize, move |t| {
                for i in 0..ITERS as usize {
                    *c_lock.local_lock_on((t + i) % PARTITIONS) += 1;
                }
            });
            let guard = lock.global_lock();
            assert!(guard.iter().all(|&count| count > 0));
            assert_eq!(guard.iter().sum::<Int>(), EXPECTED_VALUE);
        }

        /// A global section never observes a local section half-way.
        pub fn global_excludes_locals<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            let lock = Arc::new(new_lock::<P, Pair>("global_excludes"));
            let c_lock = Arc::clone(&lock);
            join_all(THREADS as usize, move |t| {
                for i in 0..ITERS {
                    if t == 0 && i % 10 == 0 {
                        let guard = c_lock.global_lock();
                        assert!(guard.iter().all(|pair| pair.a == pair.b));
                    } else {
                        let mut guard = c_lock.local_lock();
                        guard.a += 1;
                        thread::yield_now();
                        guard.b += 1;
                    }
                }
            });
            let guard = lock.global_lock();
            assert!(guard.iter().all(|pair| pair.a == pair.b));
        }

        /// Double sections on every neighbouring pair of a ring, crossing in
        /// both directions, neither deadlock nor lose updates.
        pub fn double_lock_ring<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            const START: Int = 1_000_000;
            let lock = Arc::new(
                LgLock::builder("ring")
                    .partitions(PARTITIONS)
                    .primitive::<P>()
                    .build_with(|_| START),
            );
            let c_lock = Arc::clone(&lock);
            join_all(PARTITIONS * 2, move |t| {
                let (a, b) = (t % PARTITIONS, (t + 1) % PARTITIONS);
                let (from, to) = if t < PARTITIONS { (a, b) } else { (b, a) };
                for _ in 0..ITERS {
                    let mut guard = c_lock.double_lock(from, to);
                    let (from, to) = guard.pair_mut();
                    *from -= 1;
                    *to += 1;
                }
            });
            let total: Int = lock.global_lock().iter().sum();
            assert_eq!(total, START * PARTITIONS as Int);
        }

        /// Sections of every mode run concurrently without deadlocking.
        pub fn mixed_modes<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            let lock = Arc::new(new_lock::<P, Int>("mixed"));
            let c_lock = Arc::clone(&lock);
            join_all(THREADS as usize, move |t| {
                for i in 0..ITERS as usize {
                    match (t + i) % 4 {
                        0 => *c_lock.local_lock() += 1,
                        1 => *c_lock.local_lock_on(i % PARTITIONS) += 1,
                        2 => {
                            let (a, b) = (i % PARTITIONS, (i + 1) % PARTITIONS);
                            *c_lock.double_lock(b, a).get_mut(a) += 1;
                        }
                        _ => c_lock.global_lock_then(|guard| guard[i % PARTITIONS] += 1),
                    }
                }
            });
            let total: Int = lock.global_lock().iter().sum();
            assert_eq!(total, EXPECTED_VALUE);
        }

        /// Guards dropped while unwinding still release their partitions.
        pub fn lock_access_in_unwind<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            let lock = Arc::new(new_lock::<P, Int>("unwind"));
            let c_lock = Arc::clone(&lock);
            let _ = thread::spawn(move || {
                let _local = c_lock.local_lock_on(2);
                let _double = c_lock.double_lock(0, 3);
                panic!();
            })
            .join();
            assert!((0..PARTITIONS).all(|id| !lock.is_locked(id)));
            *lock.global_lock().get_mut(2) += 1;
            assert_eq!(lock.global_lock()[2], 1);
        }

        pub fn test_lglock_debug<P: Primitive>() {
            let lock = LgLock::builder("debug").partitions(2).primitive::<P>().build::<Int>();
            assert_eq!(format!("{lock:?}"), "LgLock { name: \"debug\", locked: [false, false] }");
            let guard = lock.local_lock_on(1);
            assert_eq!(format!("{lock:?}"), "LgLock { name: \"debug\", locked: [false, true] }");
            assert_eq!(format!("{guard:?}"), "LocalGuard { id: 1, data: 0 }");
            drop(guard);
            let guard = lock.double_lock(1, 0);
            assert_eq!(format!("{guard:?}"), "DoubleGuard { ids: (1, 0), data: (0, 0) }");
            drop(guard);
            let guard = lock.global_lock();
            assert_eq!(format!("{lock:?}"), "LgLock { name: \"debug\", locked: [true, true] }");
            assert_eq!(format!("{guard:?}"), "GlobalGuard { data: [0, 0] }");
        }

        pub fn test_into_inner_drop<P: Primitive>() {
            let num_drops = Arc::new(AtomicUsize::new(0));
            let lock = LgLock::builder("drops")
                .partitions(PARTITIONS)
                .primitive::<P>()
                .build_with(|_| Foo(Arc::clone(&num_drops)));
            assert_eq!(num_drops.load(Ordering::SeqCst), 0);
            {
                let inner = lock.into_inner();
                assert_eq!(inner.len(), PARTITIONS);
                assert_eq!(num_drops.load(Ordering::SeqCst), 0);
            }
            assert_eq!(num_drops.load(Ordering::SeqCst), PARTITIONS);
        }

        pub fn test_get_mut<P: Primitive>() {
            let mut lock = new_lock::<P, Int>("get_mut");
            *lock.get_mut(3) = 30;
            for (id, value) in lock.iter_mut().enumerate() {
                *value += id as Int;
            }
            assert_eq!(lock.into_inner(), [0, 1, 2, 33]);
        }

        pub fn test_nested_lglocks<P>()
        where
            P: Primitive + Send + Sync + 'static,
        {
            // Tests nested locks and access to the inner lock's data.
            let inner = Arc::new(new_lock::<P, Int>("inner"));
            let outer = Arc::new(
                LgLock::builder("outer")
                    .partitions(2)
                    .primitive::<P>()
                    .build_with(|_| Arc::clone(&inner)),
            );
            let handles: Vec<_> = (0..2)
                .map(|id| {
                    let outer = Arc::clone(&outer);
                    thread::spawn(move || {
                        let guard = outer.local_lock_on(id);
                        *guard.local_lock_on(id) += 1;
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(inner.global_lock().iter().sum::<Int>(), 2);
        }
    }
}
