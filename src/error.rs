use alloc::collections::TryReserveError;

/// Errors returned while building an [`LgLock`].
///
/// Once a lock exists, none of its operations report errors: misuse such as
/// an out of range partition id is a programming error and panics.
///
/// [`LgLock`]: crate::LgLock
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The lock was configured with zero partitions.
    #[error("an lglock needs at least one partition")]
    NoPartitions,

    /// No partition count was configured and the number of processing units
    /// could not be discovered.
    #[error("partition count was not set and could not be discovered")]
    UnknownPartitionCount,

    /// Querying the number of processing units failed.
    #[cfg(feature = "std")]
    #[error("failed to discover the number of processing units")]
    Discover(#[from] std::io::Error),

    /// The partition slots could not be allocated.
    #[error("failed to allocate {partitions} partition slots")]
    Alloc {
        /// The number of partitions requested.
        partitions: usize,
        /// The underlying allocation failure.
        #[source]
        source: TryReserveError,
    },
}
