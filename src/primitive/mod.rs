//! Mutual exclusion primitives backing each partition slot.
//!
//! An [`LgLock`] never implements mutual exclusion by itself: every partition
//! owns one instance of some [`Primitive`] and the lock controller only
//! decides *which* instances to acquire and in what order. Which primitive
//! is used is a type parameter, chosen when the lock is constructed.
//!
//! This crate ships three of them:
//!
//! - [`SpinLock`]: a test-and-test-and-set spinlock, the cheapest option for
//!   short, rarely contended critical sections.
//! - [`McsLock`]: a barging MCS lock. Uncontended acquisitions are a single
//!   exchange like [`SpinLock`], but contended waiters line up in a FIFO
//!   queue and only the head of the queue spins on the shared lock word.
//!   This is what [`DefaultPrimitive`] picks.
//! - [`LockApi`]: an adapter for any [`lock_api::RawMutex`], which is how a
//!   blocking mutex such as `parking_lot::RawMutex` can back the partitions
//!   (see the `parking_lot` feature and the [`parking`] aliases).
//!
//! The following modules provide type aliases pairing a primitive with a
//! [`relax`] policy.
//!
//! [`LgLock`]: crate::LgLock
//! [`relax`]: crate::relax
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html

use core::fmt;

mod mcs;
mod spin;

pub use mcs::McsLock;
pub use spin::SpinLock;

/// The interface a partition slot requires from its mutual exclusion
/// primitive.
///
/// # Safety
///
/// Implementations must guarantee mutual exclusion: once [`lock`] returns on
/// one thread, no other call to [`lock`] on the same instance may return
/// until the matching [`unlock`] has been called. The primitive must be safe
/// to be acquired on one thread and released on another.
///
/// [`lock`]: Primitive::lock
/// [`unlock`]: Primitive::unlock
pub unsafe trait Primitive {
    /// Creates a new, unlocked instance.
    fn new() -> Self;

    /// Acquires this primitive, blocking the current thread until it is able
    /// to do so.
    fn lock(&self);

    /// Releases this primitive.
    ///
    /// # Safety
    ///
    /// The primitive must be held, and the caller must be acting on behalf of
    /// the holder that acquired it.
    unsafe fn unlock(&self);

    /// Returns `true` if the primitive is currently held.
    ///
    /// This method does not provide any synchronization guarantees, so its
    /// only useful as a heuristic.
    fn is_locked(&self) -> bool;
}

/// Adapts any [`lock_api::RawMutex`] into a partition [`Primitive`].
///
/// # Example
///
/// ```
/// use lglock::primitive::{LockApi, Primitive, SpinLock};
/// use lglock::relax::Spin;
///
/// let raw = LockApi::<SpinLock<Spin>>::new();
/// raw.lock();
/// assert!(raw.is_locked());
/// unsafe { raw.unlock() };
/// ```
///
/// [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
pub struct LockApi<R>(R);

// SAFETY: `lock_api::RawMutex` implementations are themselves required to
// provide mutual exclusion, and `GuardMarker` only affects `lock_api`'s own
// guard types, never the raw `lock`/`unlock` pair used here.
unsafe impl<R: lock_api::RawMutex> Primitive for LockApi<R> {
    #[inline]
    fn new() -> Self {
        Self(R::INIT)
    }

    #[inline]
    fn lock(&self) {
        self.0.lock();
    }

    #[inline]
    unsafe fn unlock(&self) {
        // SAFETY: Caller guarantees that the mutex is held.
        unsafe { self.0.unlock() }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.0.is_locked()
    }
}

impl<R: lock_api::RawMutex> fmt::Debug for LockApi<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockApi").field("locked", &self.0.is_locked()).finish()
    }
}

/// The primitive used when none is named.
///
/// A [`McsLock`] that spins with backoff on the lock word and spins while
/// waiting for queue hand-offs. With the `yield` feature enabled, both
/// waits yield to the OS scheduler instead.
#[cfg(not(feature = "yield"))]
pub type DefaultPrimitive = spins::backoff::McsLock;

/// The primitive used when none is named.
///
/// A [`McsLock`] that spins with backoff on the lock word and spins while
/// waiting for queue hand-offs. With the `yield` feature enabled, both
/// waits yield to the OS scheduler instead.
#[cfg(feature = "yield")]
pub type DefaultPrimitive = yields::backoff::McsLock;

/// Primitives that implement a `spin` relax policy.
///
/// During contention, waiters spin while signaling the processor that they
/// are running a busy-wait spin-loop.
pub mod spins {
    use crate::relax::Spin;

    /// A [`SpinLock`] that implements the [`Spin`] relax policy.
    ///
    /// [`SpinLock`]: super::SpinLock
    pub type SpinLock = super::SpinLock<Spin>;

    /// A [`McsLock`] that implements the [`Spin`] relax policy.
    ///
    /// [`McsLock`]: super::McsLock
    pub type McsLock = super::McsLock<Spin, Spin>;

    /// Primitives that implement a `spin with backoff` relax policy.
    pub mod backoff {
        use crate::relax::{Spin, SpinBackoff};

        /// A [`SpinLock`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`SpinLock`]: crate::primitive::SpinLock
        pub type SpinLock = crate::primitive::SpinLock<SpinBackoff>;

        /// A [`McsLock`] that backs off on the lock word and spins on queue
        /// hand-offs.
        ///
        /// [`McsLock`]: crate::primitive::McsLock
        pub type McsLock = crate::primitive::McsLock<SpinBackoff, Spin>;
    }
}

/// Primitives that implement a `yield` relax policy.
///
/// During contention, waiters yield the current time slice to the OS
/// scheduler. Requires the `std` feature.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod yields {
    use crate::relax::Yield;

    /// A [`SpinLock`] that implements the [`Yield`] relax policy.
    ///
    /// [`SpinLock`]: super::SpinLock
    pub type SpinLock = super::SpinLock<Yield>;

    /// A [`McsLock`] that implements the [`Yield`] relax policy.
    ///
    /// [`McsLock`]: super::McsLock
    pub type McsLock = super::McsLock<Yield, Yield>;

    /// Primitives that implement a `yield with backoff` relax policy.
    pub mod backoff {
        use crate::relax::{Yield, YieldBackoff};

        /// A [`SpinLock`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`SpinLock`]: crate::primitive::SpinLock
        pub type SpinLock = crate::primitive::SpinLock<YieldBackoff>;

        /// A [`McsLock`] that backs off on the lock word and yields on queue
        /// hand-offs.
        ///
        /// [`McsLock`]: crate::primitive::McsLock
        pub type McsLock = crate::primitive::McsLock<YieldBackoff, Yield>;
    }
}

/// Blocking primitives backed by [parking_lot].
///
/// Waiters are parked by the OS instead of spinning, and `parking_lot`'s
/// eventual fairness bounds how long any of them can be starved. Requires
/// the `parking_lot` feature.
///
/// [parking_lot]: https://docs.rs/parking_lot
#[cfg(feature = "parking_lot")]
#[cfg_attr(docsrs, doc(cfg(feature = "parking_lot")))]
pub mod parking {
    /// A [`LockApi`] adapter over `parking_lot::RawMutex`.
    ///
    /// [`LockApi`]: super::LockApi
    pub type Mutex = super::LockApi<parking_lot::RawMutex>;
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{spins, yields, LockApi, McsLock, Primitive, SpinLock};
    use crate::relax::{Loop, Spin, SpinBackoff, Yield, YieldBackoff};
    use crate::test::tests;

    #[test]
    fn lots_and_lots_spin() {
        tests::lots_and_lots_primitive::<yields::SpinLock>();
        tests::lots_and_lots_primitive::<SpinLock<YieldBackoff>>();
    }

    #[test]
    fn lots_and_lots_mcs() {
        tests::lots_and_lots_primitive::<yields::McsLock>();
        tests::lots_and_lots_primitive::<McsLock<YieldBackoff, Yield>>();
    }

    #[test]
    fn lots_and_lots_lock_api() {
        tests::lots_and_lots_primitive::<LockApi<yields::McsLock>>();
    }

    #[test]
    fn smoke_every_policy() {
        tests::smoke_primitive::<SpinLock<Spin>>();
        tests::smoke_primitive::<SpinLock<Loop>>();
        tests::smoke_primitive::<spins::backoff::SpinLock>();
        tests::smoke_primitive::<McsLock<SpinBackoff, Spin>>();
        tests::smoke_primitive::<McsLock<Loop, Loop>>();
        tests::smoke_primitive::<LockApi<spins::SpinLock>>();
    }

    #[test]
    fn lock_api_adapter_debug() {
        let raw = LockApi::<spins::SpinLock>::new();
        assert_eq!(format!("{raw:?}"), "LockApi { locked: false }");
        raw.lock();
        assert_eq!(format!("{raw:?}"), "LockApi { locked: true }");
        unsafe { raw.unlock() };
    }

    #[cfg(feature = "parking_lot")]
    #[test]
    fn lots_and_lots_parking() {
        tests::lots_and_lots_primitive::<super::parking::Mutex>();
    }
}

#[cfg(all(loom, test))]
mod model {
    use super::spins;
    use crate::loom::models;

    #[test]
    fn spin_join() {
        models::primitive_join::<spins::SpinLock>();
    }

    #[test]
    fn spin_backoff_join() {
        models::primitive_join::<spins::backoff::SpinLock>();
    }

    #[test]
    fn mcs_join() {
        models::primitive_join::<spins::McsLock>();
    }

    #[test]
    fn mcs_backoff_join() {
        models::primitive_join::<spins::backoff::McsLock>();
    }
}
