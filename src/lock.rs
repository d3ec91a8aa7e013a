use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicBool;
use crate::relax::Relax;

/// The atomic state word behind the spinning primitives.
///
/// Both [`SpinLock`] and [`McsLock`] keep their lock state in a single
/// `AtomicBool`, and MCS queue nodes use one more as their hand-off flag.
/// This trait names the handful of transitions they need so that the memory
/// orderings live in one place.
///
/// [`SpinLock`]: crate::primitive::SpinLock
/// [`McsLock`]: crate::primitive::McsLock
pub trait LockWord {
    /// Tries to move from unlocked to locked with acquire ordering.
    fn try_lock_acquire(&self) -> bool;

    /// Same as [`try_lock_acquire`], but with a weak exchange, for callers
    /// that retry in a loop anyway.
    ///
    /// [`try_lock_acquire`]: LockWord::try_lock_acquire
    fn try_lock_acquire_weak(&self) -> bool;

    /// Waits, with a relaxed load, until the word reads unlocked, running
    /// the relax policy `R` between loads.
    ///
    /// Returning does not imply ownership: callers must still win an
    /// exchange, or issue an acquire fence when the word is a hand-off flag.
    fn wait_unlocked_relaxed<R: Relax>(&self);

    /// Returns `true` if the word currently reads locked.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    fn is_locked_relaxed(&self) -> bool;

    /// Stores unlocked with release ordering.
    fn notify_release(&self);
}

impl LockWord for AtomicBool {
    fn try_lock_acquire(&self) -> bool {
        self.compare_exchange(false, true, Acquire, Relaxed).is_ok()
    }

    fn try_lock_acquire_weak(&self) -> bool {
        self.compare_exchange_weak(false, true, Acquire, Relaxed).is_ok()
    }

    fn wait_unlocked_relaxed<R: Relax>(&self) {
        let mut relax = R::new();
        while self.load(Relaxed) {
            relax.relax();
        }
    }

    fn is_locked_relaxed(&self) -> bool {
        self.load(Relaxed)
    }

    fn notify_release(&self) {
        self.store(false, Release);
    }
}
