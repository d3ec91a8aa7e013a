// Relax policies follow the shape of spin-rs' `relax.rs`, with exponential
// backoff based on crossbeam-utils' `Backoff`.
//
// Copyright (c) 2014 Mathijs van de Nes
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine how a partition slot waits while it is held by
//! some other holder.
//!
//! Each [`Primitive`] shipped by this crate is generic over one or two of
//! these policies. A policy value is created fresh for every contended wait,
//! so backoff state never leaks from one acquisition into the next.
//!
//! [`Primitive`]: crate::primitive::Primitive

use crate::cfg::hint;

/// A trait implemented by waiting strategies.
pub trait Relax {
    /// Initializes the state for a new period of contention.
    fn new() -> Self;

    /// Performs one waiting step.
    fn relax(&mut self);
}

/// Spins while signaling the processor that it is in a busy-wait loop, see
/// [`core::hint::spin_loop`].
///
/// Spinning is invisible to most schedulers. A holder that gets descheduled
/// while others spin on its slot burns their time slices too, so this policy
/// suits contexts where critical sections are short and the holder keeps its
/// processor, which is the intended use of local critical sections.
#[derive(Debug)]
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// Yields the current time slice back to the OS scheduler.
///
/// Requires the `std` feature.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
#[derive(Debug)]
pub struct Yield;

#[cfg(any(feature = "std", test))]
impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn relax(&mut self) {
        crate::cfg::thread::yield_now();
    }
}

/// Busy-waits without any processor hint.
///
/// Prefer [`Spin`]. This only exists for targets where the spin hint
/// intrinsic is miscompiled or unsupported.
#[derive(Debug)]
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

/// Like [`Spin`], but doubles the number of spin hints on every step up to a
/// fixed ceiling.
#[derive(Debug)]
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin_to(Self::SPIN_LIMIT);
        self.step.step_to(Self::SPIN_LIMIT);
    }
}

/// Spins with exponential backoff until a threshold, then starts yielding to
/// the OS scheduler like [`Yield`].
///
/// Requires the `std` feature.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
#[derive(Debug)]
pub struct YieldBackoff {
    step: Step,
}

#[cfg(any(feature = "std", test))]
impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

#[cfg(any(feature = "std", test))]
impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin_to(Self::SPIN_LIMIT);
        } else {
            crate::cfg::thread::yield_now();
        }
        self.step.step_to(Self::YIELD_LIMIT);
    }
}

/// Number of backoff steps taken so far.
#[derive(Debug)]
struct Step(u32);

impl Step {
    /// Issues `2^min(step, max)` spin hints.
    fn spin_to(&self, max: u32) {
        for _ in 0..1u32 << self.0.min(max) {
            hint::spin_loop();
        }
    }

    /// Advances the step, saturating past `end`.
    fn step_to(&mut self, end: u32) {
        if self.0 <= end {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff, Step, YieldBackoff};

    #[test]
    fn step_saturates() {
        let mut step = Step(0);
        for _ in 0..100 {
            step.step_to(4);
        }
        assert_eq!(step.0, 5);
    }

    #[test]
    fn backoff_policies_terminate() {
        let mut spin = SpinBackoff::new();
        let mut yields = YieldBackoff::new();
        for _ in 0..32 {
            spin.relax();
            yields.relax();
        }
        assert_eq!(spin.step.0, SpinBackoff::SPIN_LIMIT + 1);
        assert_eq!(yields.step.0, YieldBackoff::YIELD_LIMIT + 1);
    }
}
