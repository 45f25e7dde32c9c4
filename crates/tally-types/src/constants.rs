//! System-wide constants for the Tally settlement core.

/// Default deadline for one unit of work (lock, calculate, write, commit).
pub const DEFAULT_DB_TIMEOUT_MS: u64 = 3000;

/// Default deadline for post-commit publishing (notification, deferred).
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2000;

/// Number of recently settled references remembered in-process before
/// falling through to the storage duplicate check.
pub const DEFAULT_IDEMPOTENCY_CACHE_SIZE: usize = 100_000;

/// Default number of partitions on the deferred-settlement channel.
pub const DEFAULT_DEFERRED_PARTITIONS: usize = 8;

/// Default per-partition capacity of the deferred-settlement channel.
pub const DEFAULT_DEFERRED_CHANNEL_CAPACITY: usize = 1024;

/// Maximum adjustments the aggregator folds into one unit of work.
pub const DEFERRED_AGGREGATE_BATCH: usize = 256;

/// Default notification channel capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 4096;

/// Maximum requests accepted in one batch submission.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
