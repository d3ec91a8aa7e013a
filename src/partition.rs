use core::cell::UnsafeCell;
use core::fmt;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::Error;
use crate::observer::LockKey;
use crate::primitive::Primitive;

/// One partition: a primitive and the data it protects.
///
/// Slots are aligned to two cache lines so that neighbouring partitions
/// never share a line, even with adjacent-line prefetching.
#[repr(align(128))]
pub(crate) struct Slot<P, T> {
    raw: P,
    data: UnsafeCell<T>,
}

// SAFETY: Access to `data` from `&Slot` is only granted to whoever holds
// `raw`, so sharing a slot only requires the data to be sendable.
unsafe impl<P: Sync, T: Send> Sync for Slot<P, T> {}

impl<P: Primitive, T> Slot<P, T> {
    fn new(value: T) -> Self {
        Self { raw: P::new(), data: UnsafeCell::new(value) }
    }

    /// Acquires this slot's primitive.
    #[inline]
    pub fn lock(&self) {
        self.raw.lock();
    }

    /// Releases this slot's primitive.
    ///
    /// # Safety
    ///
    /// The slot must be held by the caller's critical section.
    #[inline]
    pub unsafe fn unlock(&self) {
        // SAFETY: Caller guarantees that the slot is held.
        unsafe { self.raw.unlock() }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a raw pointer to the protected data.
    ///
    /// Dereferencing it is only sound while the slot is held.
    #[inline]
    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<P: Primitive, T> fmt::Debug for Slot<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("locked", &self.is_locked()).finish()
    }
}

/// The fixed-size array of partition slots of one lock, together with the
/// lock's diagnostic key.
///
/// The slot count never changes after construction.
pub(crate) struct Partitions<P, T> {
    key: LockKey,
    slots: Box<[Slot<P, T>]>,
}

impl<P: Primitive, T> Partitions<P, T> {
    /// Allocates `n` unlocked slots, the data of slot `id` being `init(id)`.
    pub fn try_new<F>(name: &'static str, n: usize, mut init: F) -> Result<Self, Error>
    where
        F: FnMut(usize) -> T,
    {
        if n == 0 {
            return Err(Error::NoPartitions);
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(n)
            .map_err(|source| Error::Alloc { partitions: n, source })?;
        slots.extend((0..n).map(|id| Slot::new(init(id))));
        let key = LockKey::register(name);
        Ok(Self { key, slots: slots.into_boxed_slice() })
    }

    #[inline]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn get(&self, id: usize) -> Option<&Slot<P, T>> {
        self.slots.get(id)
    }

    /// Returns the slot of partition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[track_caller]
    pub fn slot(&self, id: usize) -> &Slot<P, T> {
        match self.slots.get(id) {
            Some(slot) => slot,
            None => self.out_of_range(id),
        }
    }

    /// Same as [`slot`](Self::slot), for exclusive access.
    #[inline]
    #[track_caller]
    pub fn slot_mut(&mut self, id: usize) -> &mut Slot<P, T> {
        let len = self.slots.len();
        match self.slots.get_mut(id) {
            Some(slot) => slot,
            None => out_of_range(&self.key, id, len),
        }
    }

    #[cold]
    #[track_caller]
    pub fn out_of_range(&self, id: usize) -> ! {
        out_of_range(&self.key, id, self.slots.len())
    }

    #[inline]
    pub fn iter(&self) -> core::slice::Iter<'_, Slot<P, T>> {
        self.slots.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Slot<P, T>> {
        self.slots.iter_mut()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.slots.into_vec().into_iter().map(Slot::into_inner).collect()
    }
}

#[cold]
#[track_caller]
fn out_of_range(key: &LockKey, id: usize, len: usize) -> ! {
    panic!("partition {id} is out of range for lglock {key} with {len} partitions")
}

#[cfg(all(not(loom), test))]
mod test {
    use super::Partitions;
    use crate::error::Error;
    use crate::primitive::spins::SpinLock;

    #[test]
    fn zero_partitions() {
        let result = Partitions::<SpinLock, ()>::try_new("zero", 0, |_| ());
        assert!(matches!(result, Err(Error::NoPartitions)));
    }

    #[test]
    fn allocation_failure() {
        let result = Partitions::<SpinLock, u64>::try_new("huge", usize::MAX, |_| 0);
        assert!(matches!(result, Err(Error::Alloc { partitions: usize::MAX, .. })));
    }

    #[test]
    fn slots_start_unlocked_and_initialized() {
        let partitions = Partitions::<SpinLock, usize>::try_new("init", 4, |id| id * 10).unwrap();
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(|slot| !slot.is_locked()));
        assert_eq!(partitions.into_inner(), [0, 10, 20, 30]);
    }

    #[test]
    fn slots_do_not_share_cache_lines() {
        let partitions = Partitions::<SpinLock, u8>::try_new("align", 2, |_| 0).unwrap();
        let a = partitions.slot(0) as *const _ as usize;
        let b = partitions.slot(1) as *const _ as usize;
        assert!(b - a >= 128);
    }

    #[test]
    #[should_panic(expected = "partition 4 is out of range")]
    fn slot_out_of_range() {
        let partitions = Partitions::<SpinLock, ()>::try_new("range", 4, |_| ()).unwrap();
        partitions.slot(4);
    }
}
