//! Switches between `core` and Loom primitives.
//!
//! Everything that a Loom model needs to observe (atomics, spin hints and
//! thread yields) must be imported from here instead of `core` or `std`.

pub mod atomic {
    #[cfg(not(all(loom, test)))]
    pub use core::sync::atomic::{fence, AtomicBool, AtomicPtr};

    #[cfg(all(loom, test))]
    pub use loom::sync::atomic::{fence, AtomicBool, AtomicPtr};
}

pub mod hint {
    #[cfg(not(all(loom, test)))]
    pub use core::hint::spin_loop;

    // Loom cannot preempt a busy loop, so a spin hint must give the model a
    // chance to schedule the lock holder.
    #[cfg(all(loom, test))]
    pub fn spin_loop() {
        loom::thread::yield_now();
    }
}

#[cfg(any(feature = "std", test))]
pub mod thread {
    #[cfg(not(all(loom, test)))]
    pub use std::thread::yield_now;

    #[cfg(all(loom, test))]
    pub use loom::thread::yield_now;
}
