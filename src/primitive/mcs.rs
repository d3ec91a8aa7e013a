use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::lock::LockWord;
use crate::primitive::Primitive;
use crate::relax::Relax;

/// A waiting queue record, living on the stack frame of a contended `lock`
/// call for as long as its owner is enqueued.
#[derive(Debug)]
struct Node {
    next: AtomicPtr<Node>,
    locked: AtomicBool,
}

impl Node {
    /// Creates a new node, locked and without successor.
    fn new() -> Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let locked = AtomicBool::new(true);
        Self { next, locked }
    }

    /// Returns a raw mutable pointer of this node.
    fn as_ptr(&self) -> *mut Self {
        (self as *const Self).cast_mut()
    }
}

/// The MCS queue that orders contended acquirers.
#[derive(Debug)]
struct Queue {
    tail: AtomicPtr<Node>,
}

impl Queue {
    #[cfg(not(all(loom, test)))]
    const fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()) }
    }

    #[cfg(all(loom, test))]
    fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Appends `node` to the queue and waits until it reaches the head.
    ///
    /// `node` must not move nor be dropped before the matching `unlock`.
    fn lock<R: Relax>(&self, node: &Node) {
        let pred = self.tail.swap(node.as_ptr(), AcqRel);
        // If we have a predecessor, complete the link so it will notify us.
        if !pred.is_null() {
            // SAFETY: A predecessor stays alive until it has handed the queue
            // off to its successor, which cannot happen before this store.
            unsafe { &*pred }.next.store(node.as_ptr(), Release);
            node.locked.wait_unlocked_relaxed::<R>();
            fence(Acquire);
        }
    }

    /// Removes the head `node`, passing the queue to its successor if any.
    fn unlock<R: Relax>(&self, node: &Node) {
        let mut next = node.next.load(Relaxed);
        // If we don't have a known successor currently,
        if next.is_null() {
            // and we are the tail, then the queue is now empty.
            let false = self.try_dequeue(node.as_ptr()) else { return };
            // But if we are not the tail, a successor is still linking.
            let mut relax = R::new();
            loop {
                next = node.next.load(Relaxed);
                let true = next.is_null() else { break };
                relax.relax();
            }
        }
        fence(Acquire);
        // SAFETY: Already verified that our successor is not null, and it
        // is waiting on its own flag, so it is still alive.
        unsafe { &*next }.locked.notify_release();
    }

    /// Empties the queue if `node` is still its tail.
    fn try_dequeue(&self, node: *mut Node) -> bool {
        self.tail.compare_exchange(node, ptr::null_mut(), Release, Relaxed).is_ok()
    }
}

/// A barging MCS lock.
///
/// Acquirers first try to grab the lock word directly. When that fails they
/// join a [Mellor-Crummey and Scott] queue: each waiter spins on a flag in its
/// own stack-allocated node, and only the head of the queue spins on the
/// shared lock word. Waiters are served in FIFO order among themselves, but
/// a fresh acquirer may still barge in front of the queue head, which keeps
/// the uncontended path as cheap as a plain spinlock.
///
/// `Rs` is the relax policy applied while the queue head waits for the lock
/// word, and `Rq` the one applied while waiting for queue hand-offs.
/// Backoff policies suit the former, plain ones the latter.
///
/// # Example
///
/// ```
/// use lglock::primitive::{McsLock, Primitive};
/// use lglock::relax::{Spin, SpinBackoff};
///
/// let lock = McsLock::<SpinBackoff, Spin>::new();
/// Primitive::lock(&lock);
/// assert!(Primitive::is_locked(&lock));
/// unsafe { Primitive::unlock(&lock) };
/// ```
///
/// [Mellor-Crummey and Scott]: https://www.cs.rochester.edu/~scott/papers/1991_TOCS_synch.pdf
pub struct McsLock<Rs, Rq> {
    lock: AtomicBool,
    queue: Queue,
    marker: PhantomData<(Rs, Rq)>,
}

impl<Rs, Rq> McsLock<Rs, Rq> {
    /// Creates a new, unlocked MCS lock (const).
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new() -> Self {
        let lock = AtomicBool::new(false);
        Self { lock, queue: Queue::new(), marker: PhantomData }
    }

    /// Creates a new, unlocked MCS lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        let lock = AtomicBool::new(false);
        Self { lock, queue: Queue::new(), marker: PhantomData }
    }
}

impl<Rs: Relax, Rq: Relax> McsLock<Rs, Rq> {
    /// Takes the lock word, queueing up behind other waiters if it is busy.
    fn acquire(&self) {
        if self.lock.try_lock_acquire_weak() {
            return;
        }
        let node = Node::new();
        self.queue.lock::<Rq>(&node);
        while !self.lock.try_lock_acquire_weak() {
            self.lock.wait_unlocked_relaxed::<Rs>();
        }
        self.queue.unlock::<Rq>(&node);
    }
}

impl<Rs, Rq> Default for McsLock<Rs, Rq> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Rs, Rq> fmt::Debug for McsLock<Rs, Rq> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("McsLock");
        d.field("locked", &self.lock.is_locked_relaxed());
        d.field("queued", &!self.queue.tail.load(Relaxed).is_null());
        d.finish()
    }
}

// SAFETY: Ownership is the lock word, which is only won by one exchange from
// `false` to `true` and reset by `unlock`. The queue only orders waiters.
unsafe impl<Rs: Relax, Rq: Relax> Primitive for McsLock<Rs, Rq> {
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
        self.lock.notify_release();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.lock.is_locked_relaxed()
    }
}

// SAFETY: Same reasoning as the `Primitive` implementation.
#[cfg(not(all(loom, test)))]
unsafe impl<Rs: Relax, Rq: Relax> lock_api::RawMutex for McsLock<Rs, Rq> {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn lock(&self) {
        self.acquire();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.lock.try_lock_acquire()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.lock.notify_release();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.lock.is_locked_relaxed()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;

    use crate::primitive::yields::McsLock;
    use crate::primitive::Primitive;

    #[test]
    fn debug() {
        let lock = McsLock::new();
        assert_eq!(format!("{lock:?}"), "McsLock { locked: false, queued: false }");
        Primitive::lock(&lock);
        assert_eq!(format!("{lock:?}"), "McsLock { locked: true, queued: false }");
        unsafe { Primitive::unlock(&lock) };
    }

    #[test]
    fn queue_drains_after_contention() {
        let lock = Arc::new(McsLock::new());
        Primitive::lock(&*lock);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    Primitive::lock(&*lock);
                    unsafe { Primitive::unlock(&*lock) };
                })
            })
            .collect();
        unsafe { Primitive::unlock(&*lock) };
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!Primitive::is_locked(&*lock));
        assert!(lock.queue.tail.load(core::sync::atomic::Ordering::Relaxed).is_null());
    }

    #[test]
    fn lock_api_mutex() {
        let mutex = lock_api::Mutex::<McsLock, _>::new([1, 2, 3]);
        mutex.lock()[1] = 5;
        assert_eq!(*mutex.lock(), [1, 5, 3]);
    }
}
