use core::fmt;
use core::marker::PhantomData;

use crate::error::Error;
use crate::lglock::LgLock;
use crate::observer::{NoopObserver, Observer};
use crate::partition::Partitions;
use crate::primitive::{DefaultPrimitive, Primitive};
use crate::sched::IntoScheduler;

/// The scheduler setting of a fresh builder.
#[cfg(feature = "std")]
pub type DefaultBinding = crate::sched::PerThread;

/// The scheduler setting of a fresh builder.
///
/// Without `std` there is no scheduler to fall back to, so one must be set
/// with [`Builder::scheduler`] before building.
#[cfg(not(feature = "std"))]
pub type DefaultBinding = NoScheduler;

/// Marks a builder that has not been given a scheduler yet.
#[cfg(not(feature = "std"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScheduler;

/// Configures and builds an [`LgLock`].
///
/// Every setting has a default:
///
/// - partitions: the number of processing units reported by
///   [`std::thread::available_parallelism`]. Without `std`, the count must
///   be set explicitly.
/// - primitive: [`DefaultPrimitive`].
/// - scheduler: a [`ThreadScheduler`] spreading threads over every
///   partition. Without `std`, a scheduler must be set explicitly.
/// - observer: [`NoopObserver`].
///
/// # Example
///
/// ```
/// use lglock::observer::LogObserver;
/// use lglock::primitive::spins::SpinLock;
/// use lglock::sched::Fixed;
/// use lglock::LgLock;
///
/// let lock = LgLock::builder("configured")
///     .partitions(8)
///     .primitive::<SpinLock>()
///     .scheduler(Fixed(0))
///     .observer(LogObserver)
///     .try_build_with(|id| id)
///     .unwrap();
/// assert_eq!(lock.partitions(), 8);
/// ```
///
/// [`std::thread::available_parallelism`]: std::thread::available_parallelism
/// [`ThreadScheduler`]: crate::sched::ThreadScheduler
pub struct Builder<P = DefaultPrimitive, S = DefaultBinding, O = NoopObserver> {
    name: &'static str,
    partitions: Option<usize>,
    scheduler: S,
    observer: O,
    marker: PhantomData<fn() -> P>,
}

impl Builder {
    /// Creates a builder with default settings for a lock named `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            partitions: None,
            scheduler: DefaultBinding::default(),
            observer: NoopObserver,
            marker: PhantomData,
        }
    }
}

impl<P, S, O> Builder<P, S, O> {
    /// Sets the number of partitions.
    ///
    /// Building fails with [`Error::NoPartitions`] if `n` is zero.
    #[must_use]
    pub fn partitions(mut self, n: usize) -> Self {
        self.partitions = Some(n);
        self
    }

    /// Sets the primitive protecting each partition.
    #[must_use]
    pub fn primitive<Q: Primitive>(self) -> Builder<Q, S, O> {
        let Self { name, partitions, scheduler, observer, .. } = self;
        Builder { name, partitions, scheduler, observer, marker: PhantomData }
    }

    /// Sets the scheduler.
    ///
    /// Any [`Scheduler`](crate::sched::Scheduler) is accepted. It must
    /// never report a partition id beyond the partition count of the lock.
    #[must_use]
    pub fn scheduler<T: IntoScheduler>(self, scheduler: T) -> Builder<P, T, O> {
        let Self { name, partitions, observer, .. } = self;
        Builder { name, partitions, scheduler, observer, marker: PhantomData }
    }

    /// Sets the observer.
    #[must_use]
    pub fn observer<T: Observer>(self, observer: T) -> Builder<P, S, T> {
        let Self { name, partitions, scheduler, .. } = self;
        Builder { name, partitions, scheduler, observer, marker: PhantomData }
    }

    fn resolve_partitions(&self) -> Result<usize, Error> {
        match self.partitions {
            Some(n) => Ok(n),
            #[cfg(feature = "std")]
            None => Ok(std::thread::available_parallelism()?.get()),
            #[cfg(not(feature = "std"))]
            None => Err(Error::UnknownPartitionCount),
        }
    }
}

impl<P: Primitive, S: IntoScheduler, O: Observer> Builder<P, S, O> {
    /// Builds the lock, initializing the data of partition `id` with
    /// `init(id)`. Partitions are initialized in ascending order.
    ///
    /// # Errors
    ///
    /// Fails if the partition count is zero or cannot be discovered, or if
    /// the slots cannot be allocated.
    pub fn try_build_with<T, F>(self, init: F) -> Result<LgLock<T, P, S::Scheduler, O>, Error>
    where
        F: FnMut(usize) -> T,
    {
        let n = self.resolve_partitions()?;
        let partitions = Partitions::try_new(self.name, n, init)?;
        log::debug!(target: "lglock", "{}: built with {n} partitions", partitions.key());
        let scheduler = self.scheduler.into_scheduler(n);
        Ok(LgLock::from_parts(partitions, scheduler, self.observer))
    }

    /// Builds the lock, with default data in every partition.
    ///
    /// # Errors
    ///
    /// Same as [`try_build_with`](Builder::try_build_with).
    pub fn try_build<T: Default>(self) -> Result<LgLock<T, P, S::Scheduler, O>, Error> {
        self.try_build_with(|_| T::default())
    }

    /// Builds the lock, initializing the data of partition `id` with
    /// `init(id)`.
    ///
    /// # Panics
    ///
    /// Panics if [`try_build_with`](Builder::try_build_with) would fail.
    #[track_caller]
    pub fn build_with<T, F>(self, init: F) -> LgLock<T, P, S::Scheduler, O>
    where
        F: FnMut(usize) -> T,
    {
        let name = self.name;
        match self.try_build_with(init) {
            Ok(lock) => lock,
            Err(err) => panic!("failed to build lglock `{name}`: {err}"),
        }
    }

    /// Builds the lock, with default data in every partition.
    ///
    /// # Panics
    ///
    /// Panics if [`try_build_with`](Builder::try_build_with) would fail.
    #[track_caller]
    pub fn build<T: Default>(self) -> LgLock<T, P, S::Scheduler, O> {
        self.build_with(|_| T::default())
    }
}

impl<P, S: fmt::Debug, O: fmt::Debug> fmt::Debug for Builder<P, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Builder");
        d.field("name", &self.name);
        d.field("partitions", &self.partitions);
        d.field("scheduler", &self.scheduler);
        d.field("observer", &self.observer);
        d.finish()
    }
}

#[cfg(all(not(loom), test, feature = "std"))]
mod test {
    use crate::error::Error;
    use crate::primitive::yields;
    use crate::sched::{Fixed, Scheduler};
    use crate::LgLock;

    #[test]
    fn zero_partitions_is_an_error() {
        let result = LgLock::builder("zero").partitions(0).try_build::<u32>();
        assert!(matches!(result, Err(Error::NoPartitions)));
    }

    #[test]
    #[should_panic(expected = "failed to build lglock `zero`")]
    fn build_panics_on_error() {
        let _ = LgLock::builder("zero").partitions(0).build::<u32>();
    }

    #[test]
    fn discovers_partition_count() {
        let expected = std::thread::available_parallelism().unwrap().get();
        let lock = LgLock::builder("auto").build::<u32>();
        assert_eq!(lock.partitions(), expected);
        assert!(lock.scheduler().current() < expected);
    }

    #[test]
    fn thread_scheduler_matches_partitions() {
        let lock = LgLock::builder("sized").partitions(3).build::<()>();
        assert_eq!(lock.scheduler().partitions(), 3);
    }

    #[test]
    fn explicit_settings() {
        let lock = LgLock::builder("explicit")
            .partitions(2)
            .primitive::<yields::SpinLock>()
            .scheduler(Fixed(1))
            .build_with(|id| id + 10);
        assert_eq!(*lock.local_lock(), 11);
        assert_eq!(lock.name(), "explicit");
    }

    #[test]
    fn builder_debug() {
        let builder = LgLock::builder("debug").partitions(2).scheduler(Fixed(0));
        assert_eq!(
            format!("{builder:?}"),
            "Builder { name: \"debug\", partitions: Some(2), scheduler: Fixed(0), observer: NoopObserver }"
        );
    }
}
