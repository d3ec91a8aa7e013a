//! Scheduling services an [`LgLock`] relies on.
//!
//! A local acquisition needs to know which partition the calling execution
//! context is associated with, and needs that association to stay fixed
//! until the matching release. Explicit and global acquisitions instead
//! need the caller to keep running until they release, which in a kernel
//! means disabling preemption. The [`Scheduler`] trait groups both services.
//!
//! Two implementations are provided:
//!
//! - [`ThreadScheduler`] (requires `std`): every OS thread is given a home
//!   partition, round-robin in the order threads first touch a lock.
//!   Pinning forbids [`migrate`] calls on the pinned thread. Preemption
//!   control is a per-thread depth counter, since user space threads can't
//!   actually stop the OS scheduler.
//! - [`Fixed`]: always reports the same partition. Useful for single core
//!   `no_std` targets, and for tests that want a specific slot.
//!
//! [`LgLock`]: crate::LgLock
//! [`migrate`]: ThreadScheduler::migrate

/// Pinning and preemption services.
///
/// Calls always come in balanced pairs on the same thread: every [`pin`] is
/// followed by an [`unpin`], and every [`preempt_disable`] by a
/// [`preempt_enable`]. Pairs of either kind may nest.
///
/// [`pin`]: Scheduler::pin
/// [`unpin`]: Scheduler::unpin
/// [`preempt_disable`]: Scheduler::preempt_disable
/// [`preempt_enable`]: Scheduler::preempt_enable
pub trait Scheduler {
    /// Returns the partition the calling context is associated with.
    ///
    /// Must be smaller than the partition count of every lock using this
    /// scheduler. Between [`pin`] and [`unpin`] it must keep returning the
    /// same value on the pinned thread.
    ///
    /// [`pin`]: Scheduler::pin
    /// [`unpin`]: Scheduler::unpin
    fn current(&self) -> usize;

    /// Prevents the calling context from moving to another partition.
    fn pin(&self);

    /// Ends one [`pin`](Scheduler::pin) section.
    fn unpin(&self);

    /// Prevents the calling context from being rescheduled.
    #[inline(always)]
    fn preempt_disable(&self) {}

    /// Ends one [`preempt_disable`](Scheduler::preempt_disable) section.
    #[inline(always)]
    fn preempt_enable(&self) {}
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    #[inline]
    fn current(&self) -> usize {
        S::current(self)
    }

    #[inline]
    fn pin(&self) {
        S::pin(self);
    }

    #[inline]
    fn unpin(&self) {
        S::unpin(self);
    }

    #[inline]
    fn preempt_disable(&self) {
        S::preempt_disable(self);
    }

    #[inline]
    fn preempt_enable(&self) {
        S::preempt_enable(self);
    }
}

/// Turns a builder's scheduler setting into the scheduler of a lock once
/// its partition count is known.
///
/// Every [`Scheduler`] converts into itself. [`PerThread`] converts into a
/// [`ThreadScheduler`] sized to the lock.
pub trait IntoScheduler {
    /// The scheduler the lock ends up with.
    type Scheduler: Scheduler;

    /// Performs the conversion for a lock with `partitions` partitions.
    fn into_scheduler(self, partitions: usize) -> Self::Scheduler;
}

impl<S: Scheduler> IntoScheduler for S {
    type Scheduler = S;

    #[inline]
    fn into_scheduler(self, _partitions: usize) -> S {
        self
    }
}

/// A scheduler that reports the same partition to every caller.
///
/// # Example
///
/// ```
/// use lglock::sched::{Fixed, Scheduler};
///
/// let sched = Fixed(3);
/// sched.pin();
/// assert_eq!(sched.current(), 3);
/// sched.unpin();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed(pub usize);

impl Scheduler for Fixed {
    #[inline]
    fn current(&self) -> usize {
        self.0
    }

    #[inline]
    fn pin(&self) {}

    #[inline]
    fn unpin(&self) {}
}

/// The scheduler a lock uses when none is named.
///
/// [`ThreadScheduler`] when `std` is available.
#[cfg(feature = "std")]
pub type DefaultScheduler = ThreadScheduler;

/// The scheduler a lock uses when none is named.
///
/// [`Fixed`] when `std` is not available.
#[cfg(not(feature = "std"))]
pub type DefaultScheduler = Fixed;

#[cfg(feature = "std")]
pub use thread::{PerThread, ThreadScheduler};

#[cfg(feature = "std")]
mod thread {
    use core::cell::Cell;
    use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    use super::{IntoScheduler, Scheduler};

    static NEXT_HOME: AtomicUsize = AtomicUsize::new(0);

    std::thread_local! {
        static HOME: Cell<Option<usize>> = const { Cell::new(None) };
        static PINS: Cell<usize> = const { Cell::new(0) };
        static PREEMPT: Cell<usize> = const { Cell::new(0) };
    }

    /// Returns the calling thread's home, assigning one on first use.
    fn home() -> usize {
        HOME.with(|home| match home.get() {
            Some(id) => id,
            None => {
                let id = NEXT_HOME.fetch_add(1, Relaxed);
                home.set(Some(id));
                id
            }
        })
    }

    /// A scheduler for OS threads.
    ///
    /// Threads get a home partition the first time they ask for one, handed
    /// out round-robin over all threads of the process. A thread keeps its
    /// home until it [`migrate`]s, which is forbidden while pinned.
    ///
    /// The pin and preemption depths are tracked per thread, and are shared
    /// by every `ThreadScheduler` instance.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::sched::{Scheduler, ThreadScheduler};
    ///
    /// let sched = ThreadScheduler::new(4);
    /// sched.migrate(2);
    /// sched.pin();
    /// assert_eq!(sched.current(), 2);
    /// assert_eq!(ThreadScheduler::pin_count(), 1);
    /// sched.unpin();
    /// ```
    ///
    /// [`migrate`]: ThreadScheduler::migrate
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadScheduler {
        partitions: usize,
    }

    impl ThreadScheduler {
        /// Creates a scheduler that spreads threads over `partitions`
        /// partitions.
        ///
        /// # Panics
        ///
        /// Panics if `partitions` is zero.
        pub fn new(partitions: usize) -> Self {
            assert!(partitions > 0, "a thread scheduler needs at least one partition");
            Self { partitions }
        }

        /// Returns the number of partitions threads are spread over.
        pub fn partitions(&self) -> usize {
            self.partitions
        }

        /// Moves the calling thread to partition `id`.
        ///
        /// # Panics
        ///
        /// Panics if `id` is out of range, or if the calling thread is
        /// currently pinned.
        #[track_caller]
        pub fn migrate(&self, id: usize) {
            assert!(
                id < self.partitions,
                "cannot migrate to partition {id}, there are only {} partitions",
                self.partitions
            );
            assert_eq!(Self::pin_count(), 0, "cannot migrate a pinned thread");
            HOME.with(|home| home.set(Some(id)));
        }

        /// Returns how deeply the calling thread is currently pinned.
        pub fn pin_count() -> usize {
            PINS.with(Cell::get)
        }

        /// Returns how deeply preemption is currently disabled on the calling
        /// thread.
        pub fn preempt_count() -> usize {
            PREEMPT.with(Cell::get)
        }
    }

    impl Scheduler for ThreadScheduler {
        #[inline]
        fn current(&self) -> usize {
            home() % self.partitions
        }

        #[inline]
        fn pin(&self) {
            PINS.with(|pins| pins.set(pins.get() + 1));
        }

        #[inline]
        fn unpin(&self) {
            PINS.with(|pins| {
                debug_assert!(pins.get() > 0, "unbalanced unpin");
                pins.set(pins.get().saturating_sub(1));
            });
        }

        #[inline]
        fn preempt_disable(&self) {
            PREEMPT.with(|count| count.set(count.get() + 1));
        }

        #[inline]
        fn preempt_enable(&self) {
            PREEMPT.with(|count| {
                debug_assert!(count.get() > 0, "unbalanced preempt_enable");
                count.set(count.get().saturating_sub(1));
            });
        }
    }

    /// Builds a [`ThreadScheduler`] spreading threads over every partition of
    /// the lock being built.
    ///
    /// This is the scheduler setting of a fresh builder.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PerThread;

    impl IntoScheduler for PerThread {
        type Scheduler = ThreadScheduler;

        #[inline]
        fn into_scheduler(self, partitions: usize) -> ThreadScheduler {
            ThreadScheduler::new(partitions)
        }
    }
}

#[cfg(all(not(loom), test, feature = "std"))]
mod test {
    use super::{Fixed, IntoScheduler, PerThread, Scheduler, ThreadScheduler};

    #[test]
    fn fixed_is_fixed() {
        let sched = Fixed(7);
        assert_eq!(sched.current(), 7);
        assert_eq!((&sched).current(), 7);
        assert_eq!(sched.into_scheduler(100), Fixed(7));
    }

    #[test]
    fn threads_spread_round_robin() {
        let sched = ThreadScheduler::new(3);
        let homes: Vec<_> = (0..6)
            .map(|_| std::thread::spawn(move || sched.current()).join().unwrap())
            .collect();
        // Other tests may be assigning homes concurrently, so only the range
        // is deterministic.
        assert!(homes.iter().all(|&home| home < 3));
    }

    #[test]
    fn home_is_stable() {
        let sched = ThreadScheduler::new(5);
        let first = sched.current();
        for _ in 0..10 {
            assert_eq!(sched.current(), first);
        }
    }

    #[test]
    fn migrate_moves_home() {
        std::thread::spawn(|| {
            let sched = ThreadScheduler::new(4);
            sched.migrate(3);
            assert_eq!(sched.current(), 3);
            sched.migrate(0);
            assert_eq!(sched.current(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    #[should_panic(expected = "cannot migrate a pinned thread")]
    fn migrate_while_pinned() {
        let sched = ThreadScheduler::new(4);
        sched.pin();
        sched.migrate(1);
    }

    #[test]
    #[should_panic(expected = "cannot migrate to partition 4")]
    fn migrate_out_of_range() {
        ThreadScheduler::new(4).migrate(4);
    }

    #[test]
    fn depths_nest() {
        std::thread::spawn(|| {
            let sched = PerThread.into_scheduler(2);
            sched.pin();
            sched.pin();
            sched.preempt_disable();
            assert_eq!(ThreadScheduler::pin_count(), 2);
            assert_eq!(ThreadScheduler::preempt_count(), 1);
            sched.preempt_enable();
            sched.unpin();
            sched.unpin();
            assert_eq!(ThreadScheduler::pin_count(), 0);
            assert_eq!(ThreadScheduler::preempt_count(), 0);
        })
        .join()
        .unwrap();
    }
}
