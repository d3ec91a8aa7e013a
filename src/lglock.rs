use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut, Index, IndexMut};

use alloc::vec::Vec;

use crate::builder::Builder;
use crate::observer::{LockKey, NoopObserver, Observer};
use crate::partition::{Partitions, Slot};
use crate::primitive::{DefaultPrimitive, Primitive};
use crate::sched::{DefaultScheduler, Scheduler};

/// A local/global lock.
///
/// An lglock is split into a fixed number of partitions, each one owning a
/// [`Primitive`] and an instance of `T`. Fast-path callers lock a single
/// partition, normally the one their execution context is associated with,
/// so callers running on different partitions never contend with each
/// other. Rare callers that need to exclude everybody lock every partition
/// at once, in ascending order.
///
/// Four acquisition modes are available:
///
/// - [`local_lock`]: locks the partition reported by the [`Scheduler`],
///   pinning the caller to it until the guard is dropped.
/// - [`local_lock_on`]: locks an explicitly named partition. The caller is
///   not pinned, so the partition may differ from its own.
/// - [`double_lock`]: locks two distinct partitions, lowest id first.
/// - [`global_lock`]: locks every partition, lowest id first.
///
/// Every acquisition returns a RAII guard that releases the lock when
/// dropped, and gives access to the data of the partitions it holds. The
/// `unsafe` `*_unlock` methods release sections whose guards were
/// [forgotten](core::mem::forget).
///
/// Since all multi-partition acquisitions take slots in ascending order,
/// none of them can deadlock against each other. Partition slots are not
/// recursive though: acquiring a partition the caller already holds, for
/// example calling [`global_lock`] while holding a [`LocalGuard`] of the
/// same lock, deadlocks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use lglock::LgLock;
///
/// // A counter split per partition, so that increments from different
/// // threads do not contend.
/// let counter = Arc::new(LgLock::builder("counter").partitions(4).build::<u64>());
///
/// let handles: Vec<_> = (0..8)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         thread::spawn(move || {
///             for _ in 0..100 {
///                 *counter.local_lock() += 1;
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// // Summing requires a consistent view of every partition.
/// let total: u64 = counter.global_lock().iter().sum();
/// assert_eq!(total, 800);
/// ```
///
/// [`local_lock`]: LgLock::local_lock
/// [`local_lock_on`]: LgLock::local_lock_on
/// [`double_lock`]: LgLock::double_lock
/// [`global_lock`]: LgLock::global_lock
pub struct LgLock<T, P = DefaultPrimitive, S = DefaultScheduler, O = NoopObserver> {
    partitions: Partitions<P, T>,
    scheduler: S,
    observer: O,
}

impl LgLock<()> {
    /// Returns a builder for a lock named `name`.
    ///
    /// The name is only used for diagnostics. See [`Builder`] for the
    /// available settings.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("stats").partitions(2).build::<u32>();
    /// assert_eq!(lock.partitions(), 2);
    /// assert_eq!(lock.name(), "stats");
    /// ```
    pub fn builder(name: &'static str) -> Builder {
        Builder::new(name)
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> LgLock<T, P, S, O> {
    pub(crate) fn from_parts(partitions: Partitions<P, T>, scheduler: S, observer: O) -> Self {
        Self { partitions, scheduler, observer }
    }

    /// Returns the number of partitions.
    #[inline]
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the name this lock was built with.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.partitions.key().name()
    }

    /// Returns the diagnostic key of this lock.
    #[inline]
    pub fn key(&self) -> &LockKey {
        self.partitions.key()
    }

    /// Returns the scheduler of this lock.
    #[inline]
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Returns the observer of this lock.
    #[inline]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Returns `true` if partition `id` is currently held by some critical
    /// section.
    ///
    /// This method does not provide any synchronization guarantees, so its
    /// only useful as a heuristic.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[track_caller]
    pub fn is_locked(&self, id: usize) -> bool {
        self.partitions.slot(id).is_locked()
    }

    /// Locks the partition of the calling context.
    ///
    /// The caller is pinned to its partition until the returned guard is
    /// dropped, so the guard always releases the partition it acquired.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler reports an out of range partition. The caller
    /// is unpinned before panicking.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    /// use lglock::sched::Fixed;
    ///
    /// let lock = LgLock::builder("local").partitions(4).scheduler(Fixed(1)).build::<u32>();
    /// let mut guard = lock.local_lock();
    /// assert_eq!(guard.id(), 1);
    /// *guard = 10;
    /// drop(guard);
    /// assert_eq!(lock.global_lock()[1], 10);
    /// ```
    #[track_caller]
    pub fn local_lock(&self) -> LocalGuard<'_, T, P, S, O> {
        let (id, slot) = self.acquire_local();
        LocalGuard::new(self, slot, id, Binding::Pinned)
    }

    /// Locks the partition of the calling context and runs `f` over the
    /// guard. The partition is released once `f` returns.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("then").partitions(2).build::<u32>();
    /// let id = lock.local_lock_then(|guard| {
    ///     **guard += 1;
    ///     guard.id()
    /// });
    /// assert_eq!(lock.global_lock()[id], 1);
    /// ```
    #[track_caller]
    pub fn local_lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut LocalGuard<'_, T, P, S, O>) -> Ret,
    {
        f(&mut self.local_lock())
    }

    /// Releases the partition of the calling context, which must have been
    /// acquired by [`local_lock`](LgLock::local_lock).
    ///
    /// # Safety
    ///
    /// The calling context must hold this lock through a [`local_lock`] whose
    /// guard was forgotten, and must not have released it since.
    ///
    /// [`local_lock`]: LgLock::local_lock
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("forget").partitions(2).build::<u32>();
    /// core::mem::forget(lock.local_lock());
    /// // SAFETY: The guard above was forgotten.
    /// unsafe { lock.local_unlock() };
    /// assert!(lock.global_lock().iter().all(|&value| value == 0));
    /// ```
    #[track_caller]
    pub unsafe fn local_unlock(&self) {
        let slot = self.partitions.slot(self.scheduler.current());
        // SAFETY: Caller guarantees that the slot is held by a pinned local
        // section of this context.
        unsafe { self.release_local(slot) }
    }

    /// Locks partition `id`.
    ///
    /// Unlike [`local_lock`](LgLock::local_lock), the caller is not pinned,
    /// and `id` may be any partition, not only the caller's own.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range, before anything is acquired.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("on").partitions(4).build::<u32>();
    /// *lock.local_lock_on(3) += 5;
    /// assert_eq!(lock.global_lock()[3], 5);
    /// ```
    #[track_caller]
    pub fn local_lock_on(&self, id: usize) -> LocalGuard<'_, T, P, S, O> {
        let slot = self.partitions.slot(id);
        let bound = Bound::new(&self.scheduler, Binding::Preempt);
        self.observer.begin_shared(self.key());
        bound.keep();
        slot.lock();
        LocalGuard::new(self, slot, id, Binding::Preempt)
    }

    /// Releases partition `id`, which must have been acquired by
    /// [`local_lock_on`](LgLock::local_lock_on).
    ///
    /// # Safety
    ///
    /// The calling context must hold partition `id` through a
    /// [`local_lock_on`] whose guard was forgotten, and must not have released
    /// it since.
    ///
    /// [`local_lock_on`]: LgLock::local_lock_on
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[track_caller]
    pub unsafe fn local_unlock_on(&self, id: usize) {
        let slot = self.partitions.slot(id);
        // SAFETY: Caller guarantees that the slot is held by an explicit
        // local section of this context.
        unsafe { self.release_on(slot) }
    }

    /// Locks partitions `a` and `b`, the lower id first.
    ///
    /// Both are held as a single critical section. Because every caller
    /// takes the lower id first, `double_lock(a, b)` and `double_lock(b, a)`
    /// never deadlock against each other.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`, or if either id is out of range, before anything
    /// is acquired.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("transfer").partitions(4).build_with(|_| 100u32);
    /// {
    ///     let mut guard = lock.double_lock(3, 1);
    ///     let (from, to) = guard.pair_mut();
    ///     *from -= 30;
    ///     *to += 30;
    /// }
    /// let guard = lock.global_lock();
    /// assert_eq!((guard[1], guard[3]), (130, 70));
    /// ```
    #[track_caller]
    pub fn double_lock(&self, a: usize, b: usize) -> DoubleGuard<'_, T, P, S, O> {
        assert_ne!(a, b, "double_lock needs two distinct partitions of lglock {}", self.key());
        let (first, second) = (self.partitions.slot(a), self.partitions.slot(b));
        let bound = Bound::new(&self.scheduler, Binding::Preempt);
        self.observer.begin_shared(self.key());
        bound.keep();
        if a < b {
            first.lock();
            second.lock();
        } else {
            second.lock();
            first.lock();
        }
        DoubleGuard { lock: self, first, second, ids: (a, b), marker: PhantomData }
    }

    /// Releases partitions `a` and `b`, which must have been acquired
    /// together by [`double_lock`](LgLock::double_lock).
    ///
    /// # Safety
    ///
    /// The calling context must hold `a` and `b` through a [`double_lock`]
    /// whose guard was forgotten, and must not have released them since.
    /// The pair may be given in either order.
    ///
    /// [`double_lock`]: LgLock::double_lock
    ///
    /// # Panics
    ///
    /// Panics if either id is out of range.
    #[track_caller]
    pub unsafe fn double_unlock(&self, a: usize, b: usize) {
        debug_assert_ne!(a, b);
        let (first, second) = (self.partitions.slot(a), self.partitions.slot(b));
        // SAFETY: Caller guarantees that both slots are held by one double
        // section of this context.
        unsafe { self.release_double(first, second) }
    }

    /// Locks every partition, in ascending order.
    ///
    /// Once this returns, no other critical section of any mode is active
    /// on this lock.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("global").partitions(3).build_with(|id| id);
    /// let mut guard = lock.global_lock();
    /// for value in guard.iter_mut() {
    ///     *value *= 2;
    /// }
    /// assert_eq!(guard.iter().copied().collect::<Vec<_>>(), [0, 2, 4]);
    /// ```
    pub fn global_lock(&self) -> GlobalGuard<'_, T, P, S, O> {
        let bound = Bound::new(&self.scheduler, Binding::Preempt);
        self.observer.begin_exclusive(self.key());
        bound.keep();
        for slot in self.partitions.iter() {
            slot.lock();
        }
        log::trace!(target: "lglock", "{}: global lock acquired", self.key());
        GlobalGuard { lock: self, marker: PhantomData }
    }

    /// Locks every partition and runs `f` over the guard. Every partition is
    /// released once `f` returns.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("sum").partitions(3).build_with(|id| id as u64);
    /// let sum = lock.global_lock_then(|guard| guard.iter().sum::<u64>());
    /// assert_eq!(sum, 3);
    /// ```
    pub fn global_lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut GlobalGuard<'_, T, P, S, O>) -> Ret,
    {
        f(&mut self.global_lock())
    }

    /// Releases every partition, which must have been acquired by
    /// [`global_lock`](LgLock::global_lock).
    ///
    /// # Safety
    ///
    /// The calling context must hold this lock through a [`global_lock`]
    /// whose guard was forgotten, and must not have released it since.
    ///
    /// [`global_lock`]: LgLock::global_lock
    pub unsafe fn global_unlock(&self) {
        // SAFETY: Caller guarantees that every slot is held by a global
        // section of this context.
        unsafe { self.release_global() }
    }

    /// Returns a mutable reference to the data of partition `id`.
    ///
    /// Since this call borrows the lock mutably, no locking is needed.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[track_caller]
    pub fn get_mut(&mut self, id: usize) -> &mut T {
        self.partitions.slot_mut(id).get_mut()
    }

    /// Returns an iterator over mutable references to the data of every
    /// partition, in ascending partition order.
    ///
    /// Since this call borrows the lock mutably, no locking is needed.
    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.partitions.iter_mut().map(Slot::get_mut)
    }

    /// Consumes this lock, returning the data of every partition in
    /// ascending partition order.
    ///
    /// # Example
    ///
    /// ```
    /// use lglock::LgLock;
    ///
    /// let lock = LgLock::builder("inner").partitions(3).build_with(|id| id * 2);
    /// assert_eq!(lock.into_inner(), [0, 2, 4]);
    /// ```
    pub fn into_inner(self) -> Vec<T> {
        self.partitions.into_inner()
    }

    /// Pins the caller and takes the slot of its partition.
    #[track_caller]
    fn acquire_local(&self) -> (usize, &Slot<P, T>) {
        let bound = Bound::new(&self.scheduler, Binding::Pinned);
        let id = self.scheduler.current();
        let Some(slot) = self.partitions.get(id) else {
            drop(bound);
            self.partitions.out_of_range(id)
        };
        self.observer.begin_shared(self.key());
        bound.keep();
        slot.lock();
        (id, slot)
    }

    /// # Safety
    ///
    /// `slot` must be held by a pinned local section of the caller.
    unsafe fn release_local(&self, slot: &Slot<P, T>) {
        self.observer.end(self.key());
        // SAFETY: Caller guarantees that the slot is held.
        unsafe { slot.unlock() };
        self.scheduler.unpin();
    }

    /// # Safety
    ///
    /// `slot` must be held by an explicit local section of the caller.
    unsafe fn release_on(&self, slot: &Slot<P, T>) {
        self.observer.end(self.key());
        // SAFETY: Caller guarantees that the slot is held.
        unsafe { slot.unlock() };
        self.scheduler.preempt_enable();
    }

    /// # Safety
    ///
    /// Both slots must be held by a single double section of the caller.
    unsafe fn release_double(&self, first: &Slot<P, T>, second: &Slot<P, T>) {
        self.observer.end(self.key());
        // SAFETY: Caller guarantees that both slots are held.
        unsafe {
            first.unlock();
            second.unlock();
        }
        self.scheduler.preempt_enable();
    }

    /// # Safety
    ///
    /// Every slot must be held by a global section of the caller.
    unsafe fn release_global(&self) {
        self.observer.end(self.key());
        for slot in self.partitions.iter() {
            // SAFETY: Caller guarantees that every slot is held.
            unsafe { slot.unlock() };
        }
        self.scheduler.preempt_enable();
        log::trace!(target: "lglock", "{}: global lock released", self.key());
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> fmt::Debug for LgLock<T, P, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Locked<'a, P, T>(&'a Partitions<P, T>);

        impl<P: Primitive, T> fmt::Debug for Locked<'_, P, T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(self.0.iter().map(Slot::is_locked)).finish()
            }
        }

        let mut d = f.debug_struct("LgLock");
        d.field("name", &self.name());
        d.field("locked", &Locked(&self.partitions));
        d.finish()
    }
}

/// How a section keeps its caller on the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Pinned,
    Preempt,
}

/// A scheduler binding that is undone when dropped, until a section guard
/// takes it over with [`keep`](Bound::keep).
///
/// Covers the window between binding the caller and taking the first slot,
/// where the scheduler or the observer may still panic.
struct Bound<'a, S: Scheduler> {
    scheduler: &'a S,
    binding: Binding,
}

impl<'a, S: Scheduler> Bound<'a, S> {
    fn new(scheduler: &'a S, binding: Binding) -> Self {
        match binding {
            Binding::Pinned => scheduler.pin(),
            Binding::Preempt => scheduler.preempt_disable(),
        }
        Self { scheduler, binding }
    }

    fn keep(self) {
        mem::forget(self);
    }
}

impl<S: Scheduler> Drop for Bound<'_, S> {
    fn drop(&mut self) {
        match self.binding {
            Binding::Pinned => self.scheduler.unpin(),
            Binding::Preempt => self.scheduler.preempt_enable(),
        }
    }
}

/// A guard over one partition, returned by [`LgLock::local_lock`] and
/// [`LgLock::local_lock_on`].
///
/// The partition is released when the guard is dropped. The guard gives
/// access to the partition's data through [`Deref`] and [`DerefMut`].
///
/// Guards are not [`Send`]: they must be dropped by the context that
/// acquired them.
#[must_use = "if unused the partition will immediately unlock"]
pub struct LocalGuard<'a, T, P: Primitive, S: Scheduler, O: Observer> {
    lock: &'a LgLock<T, P, S, O>,
    slot: &'a Slot<P, T>,
    id: usize,
    binding: Binding,
    marker: PhantomData<*const ()>,
}

// SAFETY: A shared guard only hands out `&T`.
unsafe impl<T, P, S, O> Sync for LocalGuard<'_, T, P, S, O>
where
    T: Sync,
    P: Primitive + Sync,
    S: Scheduler + Sync,
    O: Observer + Sync,
{
}

impl<'a, T, P: Primitive, S: Scheduler, O: Observer> LocalGuard<'a, T, P, S, O> {
    fn new(
        lock: &'a LgLock<T, P, S, O>,
        slot: &'a Slot<P, T>,
        id: usize,
        binding: Binding,
    ) -> Self {
        Self { lock, slot, id, binding, marker: PhantomData }
    }

    /// Returns the id of the partition this guard holds.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> Deref for LocalGuard<'_, T, P, S, O> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: The slot is held for the lifetime of the guard.
        unsafe { &*self.slot.data_ptr() }
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> DerefMut for LocalGuard<'_, T, P, S, O> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The slot is held for the lifetime of the guard.
        unsafe { &mut *self.slot.data_ptr() }
    }
}

impl<T: fmt::Debug, P: Primitive, S: Scheduler, O: Observer> fmt::Debug
    for LocalGuard<'_, T, P, S, O>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LocalGuard");
        d.field("id", &self.id);
        d.field("data", &**self);
        d.finish()
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> Drop for LocalGuard<'_, T, P, S, O> {
    fn drop(&mut self) {
        match self.binding {
            Binding::Pinned => {
                debug_assert_eq!(self.lock.scheduler.current(), self.id, "pinned context moved");
                // SAFETY: This guard holds the slot through a pinned section.
                unsafe { self.lock.release_local(self.slot) }
            }
            // SAFETY: This guard holds the slot through an explicit section.
            Binding::Preempt => unsafe { self.lock.release_on(self.slot) },
        }
    }
}

/// A guard over two partitions, returned by [`LgLock::double_lock`].
///
/// Both partitions are released when the guard is dropped.
#[must_use = "if unused the partitions will immediately unlock"]
pub struct DoubleGuard<'a, T, P: Primitive, S: Scheduler, O: Observer> {
    lock: &'a LgLock<T, P, S, O>,
    first: &'a Slot<P, T>,
    second: &'a Slot<P, T>,
    ids: (usize, usize),
    marker: PhantomData<*const ()>,
}

// SAFETY: A shared guard only hands out `&T`.
unsafe impl<T, P, S, O> Sync for DoubleGuard<'_, T, P, S, O>
where
    T: Sync,
    P: Primitive + Sync,
    S: Scheduler + Sync,
    O: Observer + Sync,
{
}

impl<T, P: Primitive, S: Scheduler, O: Observer> DoubleGuard<'_, T, P, S, O> {
    /// Returns the ids of the partitions this guard holds, in the order they
    /// were passed to [`LgLock::double_lock`].
    #[inline]
    pub fn ids(&self) -> (usize, usize) {
        self.ids
    }

    /// Returns the data of both partitions, in the order they were passed
    /// to [`LgLock::double_lock`].
    #[inline]
    pub fn pair(&self) -> (&T, &T) {
        // SAFETY: Both slots are held for the lifetime of the guard.
        unsafe { (&*self.first.data_ptr(), &*self.second.data_ptr()) }
    }

    /// Returns mutable references to the data of both partitions, in the
    /// order they were passed to [`LgLock::double_lock`].
    #[inline]
    pub fn pair_mut(&mut self) -> (&mut T, &mut T) {
        // SAFETY: Both slots are held for the lifetime of the guard, and they
        // are distinct, so the references do not alias.
        unsafe { (&mut *self.first.data_ptr(), &mut *self.second.data_ptr()) }
    }

    /// Returns the data of partition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not one of the two partitions held.
    #[inline]
    #[track_caller]
    pub fn get(&self, id: usize) -> &T {
        // SAFETY: The slot is held for the lifetime of the guard.
        unsafe { &*self.slot(id).data_ptr() }
    }

    /// Returns a mutable reference to the data of partition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not one of the two partitions held.
    #[inline]
    #[track_caller]
    pub fn get_mut(&mut self, id: usize) -> &mut T {
        // SAFETY: The slot is held for the lifetime of the guard.
        unsafe { &mut *self.slot(id).data_ptr() }
    }

    #[track_caller]
    fn slot(&self, id: usize) -> &Slot<P, T> {
        match id {
            id if id == self.ids.0 => self.first,
            id if id == self.ids.1 => self.second,
            id => panic!("partition {id} is not held by this guard, which holds {:?}", self.ids),
        }
    }
}

impl<T: fmt::Debug, P: Primitive, S: Scheduler, O: Observer> fmt::Debug
    for DoubleGuard<'_, T, P, S, O>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("DoubleGuard");
        d.field("ids", &self.ids);
        d.field("data", &self.pair());
        d.finish()
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> Drop for DoubleGuard<'_, T, P, S, O> {
    fn drop(&mut self) {
        // SAFETY: This guard holds both slots through a double section.
        unsafe { self.lock.release_double(self.first, self.second) }
    }
}

/// A guard over every partition, returned by [`LgLock::global_lock`].
///
/// Every partition is released when the guard is dropped. Partition data is
/// reachable by id, through indexing or [`get`], or in ascending partition
/// order through [`iter`] and [`iter_mut`].
///
/// [`get`]: GlobalGuard::get
/// [`iter`]: GlobalGuard::iter
/// [`iter_mut`]: GlobalGuard::iter_mut
#[must_use = "if unused the lock will immediately unlock"]
pub struct GlobalGuard<'a, T, P: Primitive, S: Scheduler, O: Observer> {
    lock: &'a LgLock<T, P, S, O>,
    marker: PhantomData<*const ()>,
}

// SAFETY: A shared guard only hands out `&T`.
unsafe impl<T, P, S, O> Sync for GlobalGuard<'_, T, P, S, O>
where
    T: Sync,
    P: Primitive + Sync,
    S: Scheduler + Sync,
    O: Observer + Sync,
{
}

impl<T, P: Primitive, S: Scheduler, O: Observer> GlobalGuard<'_, T, P, S, O> {
    /// Returns the number of partitions, all of which this guard holds.
    #[inline]
    pub fn len(&self) -> usize {
        self.lock.partitions()
    }

    /// Always `false`: a lock has at least one partition.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the data of partition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[track_caller]
    pub fn get(&self, id: usize) -> &T {
        // SAFETY: Every slot is held for the lifetime of the guard.
        unsafe { &*self.lock.partitions.slot(id).data_ptr() }
    }

    /// Returns a mutable reference to the data of partition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[track_caller]
    pub fn get_mut(&mut self, id: usize) -> &mut T {
        // SAFETY: Every slot is held for the lifetime of the guard.
        unsafe { &mut *self.lock.partitions.slot(id).data_ptr() }
    }

    /// Returns an iterator over the data of every partition.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        // SAFETY: Every slot is held for the lifetime of the guard.
        self.lock.partitions.iter().map(|slot| unsafe { &*slot.data_ptr() })
    }

    /// Returns an iterator over mutable references to the data of every
    /// partition.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        // SAFETY: Every slot is held for the lifetime of the guard, and each
        // one is yielded once.
        self.lock.partitions.iter().map(|slot| unsafe { &mut *slot.data_ptr() })
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> Index<usize> for GlobalGuard<'_, T, P, S, O> {
    type Output = T;

    #[inline]
    #[track_caller]
    fn index(&self, id: usize) -> &T {
        self.get(id)
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> IndexMut<usize> for GlobalGuard<'_, T, P, S, O> {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, id: usize) -> &mut T {
        self.get_mut(id)
    }
}

impl<T: fmt::Debug, P: Primitive, S: Scheduler, O: Observer> fmt::Debug
    for GlobalGuard<'_, T, P, S, O>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalGuard").field("data", &DebugData(self)).finish()
    }
}

struct DebugData<'a, 'b, T, P: Primitive, S: Scheduler, O: Observer>(
    &'b GlobalGuard<'a, T, P, S, O>,
);

impl<T: fmt::Debug, P: Primitive, S: Scheduler, O: Observer> fmt::Debug
    for DebugData<'_, '_, T, P, S, O>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<T, P: Primitive, S: Scheduler, O: Observer> Drop for GlobalGuard<'_, T, P, S, O> {
    fn drop(&mut self) {
        // SAFETY: This guard holds every slot through a global section.
        unsafe { self.lock.release_global() }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::panic::{self, AssertUnwindSafe};

    use crate::primitive::{spins, yields, LockApi};
    use crate::sched::Fixed;
    use crate::test::{Event::*, Recorder};
    use crate::LgLock;

    type Lock<'a> = LgLock<u32, spins::SpinLock, &'a Recorder, &'a Recorder>;

    fn recorded(recorder: &Recorder, partitions: usize) -> Lock<'_> {
        LgLock::builder("recorded")
            .partitions(partitions)
            .primitive::<spins::SpinLock>()
            .scheduler(recorder)
            .observer(recorder)
            .build_with(|id| id as u32)
    }

    #[cfg(feature = "std")]
    mod suite {
        use crate::primitive::{spins, yields, LockApi};
        use crate::test::tests;

        #[test]
        fn lots_and_lots_local() {
            tests::lots_and_lots_local::<yields::McsLock>();
            tests::lots_and_lots_local::<yields::SpinLock>();
        }

        #[test]
        fn lots_and_lots_local_on() {
            tests::lots_and_lots_local_on::<yields::backoff::McsLock>();
        }

        #[test]
        fn global_excludes_locals() {
            tests::global_excludes_locals::<yields::McsLock>();
            tests::global_excludes_locals::<LockApi<yields::SpinLock>>();
        }

        #[test]
        fn double_lock_ring() {
            tests::double_lock_ring::<yields::McsLock>();
            tests::double_lock_ring::<yields::backoff::SpinLock>();
        }

        #[test]
        fn mixed_modes() {
            tests::mixed_modes::<yields::McsLock>();
        }

        #[test]
        fn lock_access_in_unwind() {
            tests::lock_access_in_unwind::<yields::McsLock>();
        }

        #[test]
        fn lglock_debug() {
            tests::test_lglock_debug::<spins::McsLock>();
            tests::test_lglock_debug::<LockApi<spins::SpinLock>>();
        }

        #[test]
        fn into_inner_drop() {
            tests::test_into_inner_drop::<spins::SpinLock>();
        }

        #[test]
        fn get_mut() {
            tests::test_get_mut::<spins::McsLock>();
        }

        #[test]
        fn nested_lglocks() {
            tests::test_nested_lglocks::<yields::McsLock>();
        }

        #[cfg(feature = "parking_lot")]
        #[test]
        fn lots_and_lots_parking() {
            tests::lots_and_lots_local::<crate::primitive::parking::Mutex>();
            tests::mixed_modes::<crate::primitive::parking::Mutex>();
        }
    }

    #[test]
    fn local_lock_sequence() {
        let recorder = Recorder::at(2);
        let lock = recorded(&recorder, 4);
        let guard = lock.local_lock();
        assert_eq!(recorder.take(), [Pin, BeginShared]);
        assert_eq!((guard.id(), *guard), (2, 2));
        assert!(lock.is_locked(2));
        assert!(!lock.is_locked(1) && !lock.is_locked(3));
        drop(guard);
        assert_eq!(recorder.take(), [End, Unpin]);
        assert!(!lock.is_locked(2));
    }

    #[test]
    fn local_lock_on_sequence() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        let mut guard = lock.local_lock_on(3);
        assert_eq!(recorder.take(), [PreemptDisable, BeginShared]);
        *guard += 10;
        assert!(lock.is_locked(3) && !lock.is_locked(0));
        drop(guard);
        assert_eq!(recorder.take(), [End, PreemptEnable]);
        assert_eq!(lock.into_inner(), [0, 1, 2, 13]);
    }

    #[test]
    fn double_lock_sequence() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        let guard = lock.double_lock(3, 1);
        assert_eq!(recorder.take(), [PreemptDisable, BeginShared]);
        assert_eq!(guard.ids(), (3, 1));
        assert_eq!(guard.pair(), (&3, &1));
        assert!(lock.is_locked(1) && lock.is_locked(3));
        assert!(!lock.is_locked(0) && !lock.is_locked(2));
        drop(guard);
        assert_eq!(recorder.take(), [End, PreemptEnable]);
        assert!((0..4).all(|id| !lock.is_locked(id)));
    }

    #[test]
    fn global_lock_sequence() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 3);
        let guard = lock.global_lock();
        assert_eq!(recorder.take(), [PreemptDisable, BeginExclusive]);
        assert!((0..3).all(|id| lock.is_locked(id)));
        assert_eq!(guard.len(), 3);
        assert!(!guard.is_empty());
        drop(guard);
        assert_eq!(recorder.take(), [End, PreemptEnable]);
        assert!((0..3).all(|id| !lock.is_locked(id)));
    }

    #[test]
    fn single_partition_lock() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 1);
        drop(lock.local_lock());
        drop(lock.local_lock_on(0));
        let mut guard = lock.global_lock();
        guard[0] = 7;
        assert_eq!(guard.iter().copied().collect::<Vec<_>>(), [7]);
    }

    #[test]
    fn global_after_every_local_released() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        for home in 0..4 {
            recorder.set_home(home);
            *lock.local_lock() += 100;
        }
        let guard = lock.global_lock();
        assert_eq!(guard.iter().copied().collect::<Vec<_>>(), [100, 101, 102, 103]);
    }

    #[test]
    fn raw_unlocks_after_forget() {
        let recorder = Recorder::at(1);
        let lock = recorded(&recorder, 4);

        core::mem::forget(lock.local_lock());
        unsafe { lock.local_unlock() };
        core::mem::forget(lock.local_lock_on(2));
        unsafe { lock.local_unlock_on(2) };
        core::mem::forget(lock.double_lock(0, 3));
        unsafe { lock.double_unlock(3, 0) };
        core::mem::forget(lock.global_lock());
        unsafe { lock.global_unlock() };

        assert!((0..4).all(|id| !lock.is_locked(id)));
        let expected = [
            [Pin, BeginShared, End, Unpin],
            [PreemptDisable, BeginShared, End, PreemptEnable],
            [PreemptDisable, BeginShared, End, PreemptEnable],
            [PreemptDisable, BeginExclusive, End, PreemptEnable],
        ];
        assert_eq!(recorder.take(), expected.concat());
    }

    #[test]
    fn closure_forms() {
        let lock = LgLock::builder("closures")
            .partitions(2)
            .primitive::<spins::McsLock>()
            .scheduler(Fixed(1))
            .build::<u32>();
        let id = lock.local_lock_then(|guard| {
            **guard = 5;
            guard.id()
        });
        assert_eq!(id, 1);
        let sum = lock.global_lock_then(|guard| {
            guard[0] = 2;
            guard.iter().sum::<u32>()
        });
        assert_eq!(sum, 7);
    }

    #[test]
    fn double_guard_accessors() {
        let lock = LgLock::builder("accessors")
            .partitions(4)
            .primitive::<LockApi<spins::SpinLock>>()
            .scheduler(Fixed(0))
            .build_with(|id| id * 10);
        let mut guard = lock.double_lock(2, 0);
        *guard.get_mut(0) += 1;
        *guard.get_mut(2) += 2;
        let (first, second) = guard.pair_mut();
        core::mem::swap(first, second);
        assert_eq!((*guard.get(0), *guard.get(2)), (22, 1));
    }

    #[test]
    #[should_panic(expected = "partition 1 is not held by this guard")]
    fn double_guard_foreign_partition() {
        let lock = LgLock::builder("foreign").partitions(4).scheduler(Fixed(0)).build::<u32>();
        let guard = lock.double_lock(0, 2);
        let _ = guard.get(1);
    }

    #[test]
    fn local_lock_on_out_of_range() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.local_lock_on(5))));
        assert!(result.is_err());
        assert!(recorder.take().is_empty());
        assert!((0..4).all(|id| !lock.is_locked(id)));
    }

    #[test]
    fn local_lock_out_of_range_unpins() {
        let recorder = Recorder::at(4);
        let lock = recorded(&recorder, 4);
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.local_lock())));
        assert!(result.is_err());
        assert_eq!(recorder.take(), [Pin, Unpin]);
    }

    #[test]
    fn double_lock_same_partition() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.double_lock(2, 2))));
        assert!(result.is_err());
        assert!(recorder.take().is_empty());
        assert!(!lock.is_locked(2));
    }

    #[test]
    fn double_lock_out_of_range() {
        let recorder = Recorder::at(0);
        let lock = recorded(&recorder, 4);
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.double_lock(0, 4))));
        assert!(result.is_err());
        assert!(recorder.take().is_empty());
        assert!(!lock.is_locked(0));
    }

    #[test]
    #[should_panic(expected = "partition 9 is out of range for lglock")]
    fn get_mut_out_of_range() {
        let mut lock = LgLock::builder("get_mut").partitions(2).scheduler(Fixed(0)).build::<u32>();
        lock.get_mut(9);
    }

    #[test]
    fn primitives_are_interchangeable() {
        fn total<P: crate::primitive::Primitive>() -> u32 {
            let lock = LgLock::builder("interchangeable")
                .partitions(3)
                .primitive::<P>()
                .scheduler(Fixed(2))
                .build_with(|id| id as u32);
            *lock.local_lock() += 1;
            *lock.double_lock(0, 1).get_mut(1) += 1;
            lock.global_lock_then(|guard| guard.iter().sum())
        }
        assert_eq!(total::<spins::SpinLock>(), 5);
        assert_eq!(total::<spins::backoff::McsLock>(), 5);
        assert_eq!(total::<yields::McsLock>(), 5);
        assert_eq!(total::<LockApi<yields::backoff::SpinLock>>(), 5);
    }

    #[cfg(feature = "std")]
    #[test]
    fn validator_catches_recursive_acquisition() {
        use crate::observer::OrderValidator;

        let lock = LgLock::builder("recursive")
            .partitions(2)
            .scheduler(Fixed(0))
            .observer(OrderValidator::new())
            .build::<u32>();
        let _local = lock.local_lock_on(0);
        // The validator fires before any slot is touched.
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.local_lock_on(1))));
        assert!(result.is_err());
    }

    #[cfg(feature = "std")]
    #[test]
    fn observer_panic_restores_scheduler() {
        use crate::observer::OrderValidator;
        use crate::sched::ThreadScheduler;

        fn depths() -> (usize, usize) {
            (ThreadScheduler::pin_count(), ThreadScheduler::preempt_count())
        }

        std::thread::spawn(|| {
            let lock = LgLock::builder("restores")
                .partitions(2)
                .observer(OrderValidator::new())
                .build::<u32>();
            let outer = lock.local_lock_on(1);
            assert_eq!(depths(), (0, 1));

            let attempts: [&dyn Fn(); 4] = [
                &|| drop(lock.local_lock()),
                &|| drop(lock.local_lock_on(0)),
                &|| drop(lock.double_lock(0, 1)),
                &|| drop(lock.global_lock()),
            ];
            for attempt in attempts {
                assert!(panic::catch_unwind(AssertUnwindSafe(attempt)).is_err());
                assert_eq!(depths(), (0, 1));
            }

            drop(outer);
            assert_eq!(depths(), (0, 0));
            assert!((0..2).all(|id| !lock.is_locked(id)));
            // Not left pinned, so the thread can still move.
            lock.scheduler().migrate(0);
            assert_eq!(lock.local_lock().id(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn observer_panic_unpins_recorded() {
        use crate::observer::{LockKey, Observer};

        struct Panicking<'a>(&'a Recorder);

        impl Observer for Panicking<'_> {
            fn begin_shared(&self, key: &LockKey) {
                Observer::begin_shared(self.0, key);
                panic!("rejected");
            }
        }

        let recorder = Recorder::at(1);
        let lock = LgLock::builder("panicking")
            .partitions(2)
            .primitive::<spins::SpinLock>()
            .scheduler(&recorder)
            .observer(Panicking(&recorder))
            .build::<u32>();
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.local_lock())));
        assert!(result.is_err());
        assert_eq!(recorder.take(), [Pin, BeginShared, Unpin]);
        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(lock.double_lock(0, 1))));
        assert!(result.is_err());
        assert_eq!(recorder.take(), [PreemptDisable, BeginShared, PreemptEnable]);
        assert!(!lock.is_locked(0) && !lock.is_locked(1));
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::primitive::spins;

    #[test]
    fn local_on_vs_global_spin() {
        models::local_on_vs_global::<spins::SpinLock>();
    }

    #[test]
    fn local_on_vs_global_mcs() {
        models::local_on_vs_global::<spins::McsLock>();
    }

    #[test]
    fn crossing_double_locks_spin() {
        models::crossing_double_locks::<spins::SpinLock>();
    }

    #[test]
    fn crossing_double_locks_mcs() {
        models::crossing_double_locks::<spins::McsLock>();
    }
}
