//! Diagnostic hooks around every critical section.
//!
//! Each lock operation reports to an [`Observer`] right before it starts
//! acquiring partition slots, and right before it releases them. Local,
//! local-on and double acquisitions are reported as *shared* access, since
//! two of them on different partitions never conflict. Global acquisitions
//! are reported as *exclusive* access, since they conflict with everything.
//!
//! Observers are purely diagnostic: they run on the acquiring thread, never
//! change which slots are taken, and the default [`NoopObserver`] compiles
//! down to nothing.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use alloc::sync::Arc;

/// The diagnostic identity of one lock.
///
/// Every lock gets a fresh key when it is built, so two locks that share a
/// name are still told apart. The key carries no other meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    name: &'static str,
    id: usize,
}

impl LockKey {
    /// Allocates a new, process-unique key.
    pub(crate) fn register(name: &'static str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        Self { name, id: NEXT.fetch_add(1, Relaxed) }
    }

    /// Returns the name the lock was built with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the process-unique id of this key.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Receives the begin and end events of every critical section.
///
/// All methods default to no-ops.
pub trait Observer {
    /// A local, local-on or double acquisition is about to take its slots.
    #[inline(always)]
    fn begin_shared(&self, _key: &LockKey) {}

    /// A global acquisition is about to take every slot.
    #[inline(always)]
    fn begin_exclusive(&self, _key: &LockKey) {}

    /// A critical section is about to release its slots.
    #[inline(always)]
    fn end(&self, _key: &LockKey) {}
}

/// An observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

impl<O: Observer + ?Sized> Observer for &O {
    #[inline]
    fn begin_shared(&self, key: &LockKey) {
        O::begin_shared(self, key);
    }

    #[inline]
    fn begin_exclusive(&self, key: &LockKey) {
        O::begin_exclusive(self, key);
    }

    #[inline]
    fn end(&self, key: &LockKey) {
        O::end(self, key);
    }
}

impl<O: Observer + ?Sized> Observer for Arc<O> {
    #[inline]
    fn begin_shared(&self, key: &LockKey) {
        O::begin_shared(self, key);
    }

    #[inline]
    fn begin_exclusive(&self, key: &LockKey) {
        O::begin_exclusive(self, key);
    }

    #[inline]
    fn end(&self, key: &LockKey) {
        O::end(self, key);
    }
}

/// An observer that emits a `trace` level [log] record for every event.
///
/// [log]: https://docs.rs/log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn begin_shared(&self, key: &LockKey) {
        log::trace!(target: "lglock", "{key}: begin shared");
    }

    fn begin_exclusive(&self, key: &LockKey) {
        log::trace!(target: "lglock", "{key}: begin exclusive");
    }

    fn end(&self, key: &LockKey) {
        log::trace!(target: "lglock", "{key}: end");
    }
}

#[cfg(all(any(feature = "std", test), not(all(loom, test))))]
pub use validator::OrderValidator;

#[cfg(all(any(feature = "std", test), not(all(loom, test))))]
mod validator {
    use core::cell::RefCell;
    use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::collections::HashSet;
    use std::vec::Vec;

    use super::{LockKey, Observer};
    use crate::primitive::yields::SpinLock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Access {
        Shared,
        Exclusive,
    }

    #[derive(Debug, Clone, Copy)]
    struct Held {
        validator: usize,
        key: LockKey,
        access: Access,
    }

    std::thread_local! {
        static HELD: RefCell<Vec<Held>> = const { RefCell::new(Vec::new()) };
    }

    /// A lock-order validator.
    ///
    /// Tracks, per thread, which observed lglocks are currently held, and
    /// panics when:
    ///
    /// - a thread acquires an lglock it already holds, in any mode. Slots
    ///   are not recursive, so this either self-deadlocks now or does so as
    ///   soon as the two sections touch the same partition.
    /// - two lglocks are nested in opposite orders. Every nesting `A -> B`
    ///   seen by this validator is recorded, and a later `B -> A` on any
    ///   thread is reported even if it did not deadlock this time.
    ///
    /// A single validator may be shared between many locks through `&` or
    /// `Arc`, which is required for ordering checks across them. Sections
    /// reported to one validator are invisible to every other validator.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use lglock::observer::OrderValidator;
    /// use lglock::LgLock;
    ///
    /// let validator = Arc::new(OrderValidator::new());
    /// let lock = LgLock::builder("example")
    ///     .partitions(2)
    ///     .observer(Arc::clone(&validator))
    ///     .build_with(|id| id);
    ///
    /// let guard = lock.local_lock_on(1);
    /// assert_eq!(OrderValidator::held_by_current_thread(), 1);
    /// drop(guard);
    /// assert_eq!(OrderValidator::held_by_current_thread(), 0);
    /// ```
    #[derive(Debug)]
    pub struct OrderValidator {
        id: usize,
        edges: lock_api::Mutex<SpinLock, HashSet<(usize, usize)>>,
    }

    impl Default for OrderValidator {
        fn default() -> Self {
            static NEXT: AtomicUsize = AtomicUsize::new(0);
            Self { id: NEXT.fetch_add(1, Relaxed), edges: lock_api::Mutex::default() }
        }
    }

    impl OrderValidator {
        /// Creates a validator that has not seen any nesting yet.
        pub fn new() -> Self {
            Self::default()
        }

        /// Returns how many critical sections, observed by any validator,
        /// the calling thread is currently inside of.
        pub fn held_by_current_thread() -> usize {
            HELD.with(|held| held.borrow().len())
        }

        /// Returns how many critical sections observed by this validator
        /// the calling thread is currently inside of.
        pub fn held(&self) -> usize {
            HELD.with(|held| self.own(&held.borrow()).count())
        }

        fn own<'a>(&self, held: &'a [Held]) -> impl Iterator<Item = &'a Held> + 'a {
            let id = self.id;
            held.iter().filter(move |held| held.validator == id)
        }

        fn begin(&self, key: &LockKey, access: Access) {
            HELD.with(|held| {
                let held = held.borrow();
                if let Some(outer) = self.own(&held).find(|outer| outer.key == *key) {
                    violation(format_args!(
                        "recursive acquisition of lglock {key} ({access:?} inside {:?})",
                        outer.access
                    ));
                }
                let mut edges = self.edges.lock();
                for outer in self.own(&held) {
                    if edges.contains(&(key.id(), outer.key.id())) {
                        violation(format_args!(
                            "lock order inversion: {} -> {key}, but {key} -> {} was seen before",
                            outer.key, outer.key
                        ));
                    }
                    edges.insert((outer.key.id(), key.id()));
                }
            });
            HELD.with(|held| {
                held.borrow_mut().push(Held { validator: self.id, key: *key, access });
            });
        }
    }

    impl Observer for OrderValidator {
        fn begin_shared(&self, key: &LockKey) {
            self.begin(key, Access::Shared);
        }

        fn begin_exclusive(&self, key: &LockKey) {
            self.begin(key, Access::Exclusive);
        }

        fn end(&self, key: &LockKey) {
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                let pos = held.iter().rposition(|h| h.validator == self.id && h.key == *key);
                if let Some(pos) = pos {
                    held.remove(pos);
                }
            });
        }
    }

    #[cold]
    #[track_caller]
    fn violation(msg: core::fmt::Arguments<'_>) -> ! {
        log::error!(target: "lglock", "{msg}");
        panic!("{msg}");
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    use super::{LockKey, Observer, OrderValidator};

    #[test]
    fn keys_are_unique() {
        let a = LockKey::register("same");
        let b = LockKey::register("same");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
        assert_eq!(format!("{a}"), format!("same#{}", a.id()));
    }

    #[test]
    fn validator_allows_disjoint_sections() {
        let validator = OrderValidator::new();
        let (a, b) = (LockKey::register("a"), LockKey::register("b"));
        validator.begin_shared(&a);
        validator.end(&a);
        validator.begin_exclusive(&b);
        validator.end(&b);
        validator.begin_shared(&a);
        validator.end(&a);
        assert_eq!(OrderValidator::held_by_current_thread(), 0);
    }

    #[test]
    fn validator_rejects_recursion() {
        let validator = OrderValidator::new();
        let a = LockKey::register("a");
        validator.begin_shared(&a);
        let result = panic::catch_unwind(AssertUnwindSafe(|| validator.begin_exclusive(&a)));
        assert!(result.is_err());
        validator.end(&a);
        assert_eq!(OrderValidator::held_by_current_thread(), 0);
    }

    #[test]
    fn validator_rejects_inversion_across_threads() {
        let validator = Arc::new(OrderValidator::new());
        let (a, b) = (LockKey::register("a"), LockKey::register("b"));

        let c_validator = Arc::clone(&validator);
        std::thread::spawn(move || {
            c_validator.begin_shared(&a);
            c_validator.begin_shared(&b);
            c_validator.end(&b);
            c_validator.end(&a);
        })
        .join()
        .unwrap();

        validator.begin_exclusive(&b);
        let result = panic::catch_unwind(AssertUnwindSafe(|| validator.begin_shared(&a)));
        assert!(result.is_err());
        validator.end(&b);
    }

    #[test]
    fn validators_track_their_own_sections() {
        let (first, second) = (OrderValidator::new(), OrderValidator::new());
        let (a, b) = (LockKey::register("a"), LockKey::register("b"));

        // `a -> b` nests only under `first`, so `second` records no edge.
        first.begin_shared(&a);
        second.begin_shared(&b);
        assert_eq!((first.held(), second.held()), (1, 1));
        assert_eq!(OrderValidator::held_by_current_thread(), 2);
        second.end(&b);
        first.end(&a);

        second.begin_shared(&b);
        second.begin_shared(&a);
        second.end(&a);
        second.end(&b);

        // The same key held under `first` is not a recursion for `second`.
        first.begin_exclusive(&a);
        second.begin_exclusive(&a);
        second.end(&a);
        first.end(&a);
        assert_eq!(OrderValidator::held_by_current_thread(), 0);
    }

    #[test]
    fn shared_observer_forwards() {
        let validator = Arc::new(OrderValidator::new());
        let a = LockKey::register("a");
        let by_ref = &*validator;
        by_ref.begin_shared(&a);
        assert_eq!(OrderValidator::held_by_current_thread(), 1);
        validator.end(&a);
        assert_eq!(OrderValidator::held_by_current_thread(), 0);
    }
}
