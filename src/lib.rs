//! A local/global lock, also known as an lglock or a big-reader lock.
//!
//! An [`LgLock`] is split into a fixed number of partitions, typically one
//! per processing unit. Each partition owns its own mutual exclusion
//! primitive and its own piece of data. The common, fast path locks a
//! single partition, so callers running on different partitions never touch
//! each other's cache lines nor contend for the same lock word. The rare,
//! slow path locks every partition, in ascending order, and thereby
//! excludes everybody.
//!
//! This trades a slower global acquisition, which is O(N) in the number of
//! partitions, for local acquisitions that scale with the number of
//! processing units. It pays off for data that is updated locally very
//! often and read or reconfigured globally rarely, for example per-CPU
//! statistics, per-CPU free lists or per-CPU file tables.
//!
//! ## Acquisition modes
//!
//! - [`local_lock`]: the partition of the calling context, as reported by a
//!   [`Scheduler`]. The caller is pinned to its partition until it releases.
//! - [`local_lock_on`]: an explicitly named partition.
//! - [`double_lock`]: two distinct partitions, the lower id first.
//! - [`global_lock`]: every partition, the lower id first.
//!
//! Since every multi-partition acquisition takes slots in ascending id
//! order, the lock itself can never deadlock across modes. Slots are not
//! recursive though, so a context must not acquire a partition it already
//! holds. The [`OrderValidator`] observer detects that misuse, and lock
//! order inversions between different lglocks, at runtime.
//!
//! ## Pluggable parts
//!
//! - The per-partition primitive, see the [`primitive`] module. The default
//!   is a barging MCS lock, and any [`lock_api::RawMutex`] can be adapted.
//! - The scheduler, see the [`sched`] module. The default gives every OS
//!   thread a home partition, round-robin.
//! - The observer, see the [`observer`] module. The default does nothing.
//!
//! ## Features
//!
//! This crate is `no_std` when the default `std` feature is disabled, but
//! still requires `alloc` for the partition array. Features that can be
//! enabled are:
//!
//! ### std
//!
//! Enabled by default. Provides the [`ThreadScheduler`], the
//! [`OrderValidator`], and discovers the default partition count through
//! [`std::thread::available_parallelism`].
//!
//! ### yield
//!
//! The `yield` feature requires linking to the standard library. By enabling
//! it, the [`DefaultPrimitive`] will call [`std::thread::yield_now`] while
//! waiting, instead of busy-waiting with [`core::hint::spin_loop`].
//!
//! ### parking_lot
//!
//! Provides the [`primitive::parking`] aliases, which back every partition
//! with a `parking_lot::RawMutex`. Waiters are parked by the OS instead of
//! spinning.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use lglock::LgLock;
//!
//! let stats = Arc::new(LgLock::builder("stats").partitions(4).build::<u64>());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let stats = Arc::clone(&stats);
//!         thread::spawn(move || {
//!             for _ in 0..10 {
//!                 *stats.local_lock_on(id) += 1;
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let total = stats.global_lock_then(|guard| guard.iter().sum::<u64>());
//! assert_eq!(total, 40);
//! ```
//!
//! [`local_lock`]: LgLock::local_lock
//! [`local_lock_on`]: LgLock::local_lock_on
//! [`double_lock`]: LgLock::double_lock
//! [`global_lock`]: LgLock::global_lock
//! [`Scheduler`]: sched::Scheduler
//! [`ThreadScheduler`]: sched::ThreadScheduler
//! [`OrderValidator`]: observer::OrderValidator
//! [`DefaultPrimitive`]: primitive::DefaultPrimitive
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`std::thread::available_parallelism`]: https://doc.rust-lang.org/std/thread/fn.available_parallelism.html
//! [`std::thread::yield_now`]: https://doc.rust-lang.org/std/thread/fn.yield_now.html

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::inline_always)]
#![warn(missing_docs)]

extern crate alloc;

pub mod observer;
pub mod primitive;
pub mod relax;
pub mod sched;

mod builder;
mod error;
mod lglock;
mod partition;

pub(crate) mod cfg;
pub(crate) mod lock;

pub use builder::{Builder, DefaultBinding};
pub use error::Error;
pub use lglock::{DoubleGuard, GlobalGuard, LgLock, LocalGuard};

#[cfg(not(feature = "std"))]
pub use builder::NoScheduler;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin))]
pub(crate) mod loom;
