use core::fmt;
use core::marker::PhantomData;

use crate::cfg::atomic::AtomicBool;
use crate::lock::LockWord;
use crate::primitive::Primitive;
use crate::relax::Relax;

/// A test-and-test-and-set spinlock.
///
/// Acquirers race on a single lock word. A failed exchange is followed by
/// relaxed loads until the word reads unlocked again, so waiters only write
/// to the shared cache line when the lock actually looks free. There is no
/// fairness guarantee: whoever wins the exchange after a release gets the
/// lock.
///
/// The waiting strategy is the `R` relax policy, see [`relax`].
///
/// # Example
///
/// ```
/// use lglock::primitive::{Primitive, SpinLock};
/// use lglock::relax::Spin;
///
/// let lock = SpinLock::<Spin>::new();
/// Primitive::lock(&lock);
/// assert!(Primitive::is_locked(&lock));
/// unsafe { Primitive::unlock(&lock) };
/// assert!(!Primitive::is_locked(&lock));
/// ```
///
/// [`relax`]: crate::relax
pub struct SpinLock<R> {
    state: AtomicBool,
    marker: PhantomData<R>,
}

impl<R> SpinLock<R> {
    /// Creates a new, unlocked spinlock (const).
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new() -> Self {
        Self { state: AtomicBool::new(false), marker: PhantomData }
    }

    /// Creates a new, unlocked spinlock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        Self { state: AtomicBool::new(false), marker: PhantomData }
    }
}

impl<R: Relax> SpinLock<R> {
    /// Spins until the lock word is won.
    fn acquire(&self) {
        while !self.state.try_lock_acquire_weak() {
            self.state.wait_unlocked_relaxed::<R>();
        }
    }
}

impl<R> Default for SpinLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for SpinLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock").field("locked", &self.state.is_locked_relaxed()).finish()
    }
}

// SAFETY: Only the thread that wins the exchange from `false` to `true`
// returns from `lock`, and the word is only reset by `unlock`.
unsafe impl<R: Relax> Primitive for SpinLock<R> {
    #[inline]
    fn new() -> Self {
        Self::new()
    }

    #[inline]
    fn lock(&self) {
        self.acquire();
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.state.notify_release();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.is_locked_relaxed()
    }
}

// SAFETY: Same reasoning as the `Primitive` implementation.
#[cfg(not(all(loom, test)))]
unsafe impl<R: Relax> lock_api::RawMutex for SpinLock<R> {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn lock(&self) {
        self.acquire();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.state.try_lock_acquire()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.state.notify_release();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.is_locked_relaxed()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::primitive::spins::SpinLock;
    use crate::primitive::Primitive;

    #[test]
    fn lock_unlock() {
        let lock = SpinLock::new();
        assert!(!Primitive::is_locked(&lock));
        Primitive::lock(&lock);
        assert!(Primitive::is_locked(&lock));
        unsafe { Primitive::unlock(&lock) };
        assert!(!Primitive::is_locked(&lock));
    }

    #[test]
    fn debug() {
        let lock = SpinLock::default();
        assert_eq!(format!("{lock:?}"), "SpinLock { locked: false }");
    }

    #[test]
    fn lock_api_mutex() {
        let mutex = lock_api::Mutex::<SpinLock, _>::new(1);
        *mutex.lock() += 1;
        assert!(mutex.try_lock().is_some());
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        assert_eq!(*guard, 2);
    }
}
