// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache façade: partition routing and the public operations.

use std::{
    hash::Hash,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use futures::FutureExt as _;
use parking_lot::Mutex;
use tick::{Clock, FutureExt as _};
use tokio::sync::oneshot;

use crate::{
    Expiration,
    error::{CacheError, ReadError},
    keylock::FillSignal,
    partition::{Admission, OwnerGuard, Partition},
    purger::Purger,
    store::Lookup,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

/// Type alias for cache names used in telemetry.
pub type CacheName = &'static str;

/// Upper bound on how long a waiter stays parked without hearing from the
/// owner. A safety net against coordinator bugs, not a bound on producer
/// latency; producers may legitimately run long.
const COORDINATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A partitioned in-memory cache with single-flight fills.
///
/// Keys are routed to one of a fixed set of partitions by a stable hash.
/// Within a partition, [`read`](Self::read) guarantees that concurrent
/// misses for the same key invoke the caller-supplied producer exactly once:
/// one caller is elected owner and runs it, everyone else waits for the
/// owner's outcome. Owners that disappear (cancelled, aborted, panicked)
/// are detected, and their waiters receive a well-defined error instead of
/// blocking forever.
///
/// `E` is the producer error type; it must be `Clone` because one producer
/// error fans out to every waiter verbatim.
///
/// # Examples
///
/// ```
/// use corral::{Cache, Expiration};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let cache = Cache::builder::<String, String, String>(clock).build();
///
/// let value = cache
///     .read(&"user:7".to_string(), Expiration::after_millis(500), || async {
///         // Runs at most once per miss, no matter how many callers race.
///         Ok("expensive".to_string())
///     })
///     .await?;
/// assert_eq!(value, "expensive");
/// # Ok::<(), corral::ReadError<String>>(())
/// # });
/// ```
pub struct Cache<K, V, E> {
    name: CacheName,
    partitions: Vec<Arc<Partition<K, V, E>>>,
    purgers: Mutex<Vec<Purger>>,
    router: ahash::RandomState,
    clock: Clock,
    telemetry: CacheTelemetry,
}

impl Cache<(), (), ()> {
    /// Creates a new cache builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use corral::Cache;
    /// use tick::Clock;
    ///
    /// let clock = Clock::new_frozen();
    /// let cache = Cache::builder::<String, i32, String>(clock).partitions(4).build();
    /// ```
    #[must_use]
    pub fn builder<K, V, E>(clock: Clock) -> crate::builder::CacheBuilder<K, V, E> {
        crate::builder::CacheBuilder::new(clock)
    }
}

impl<K, V, E> Cache<K, V, E> {
    pub(crate) fn new(
        name: CacheName,
        partitions: Vec<Arc<Partition<K, V, E>>>,
        purgers: Vec<Purger>,
        router: ahash::RandomState,
        clock: Clock,
        telemetry: CacheTelemetry,
    ) -> Self {
        Self {
            name,
            partitions,
            purgers: Mutex::new(purgers),
            router,
            clock,
            telemetry,
        }
    }

    /// Returns the name of this cache for telemetry identification.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.name
    }

    /// Returns a reference to the cache's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Cancels the background purgers.
    ///
    /// Lookups keep honoring deadlines afterwards; only the memory-hygiene
    /// reclamation stops. Dropping the cache has the same effect.
    pub fn stop(&self) {
        for purger in self.purgers.lock().drain(..) {
            purger.stop();
        }
    }
}

impl<K, V, E> Cache<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Which partition `key` routes to. Deterministic for the lifetime of
    /// this cache instance.
    #[must_use]
    pub fn partition_of(&self, key: &K) -> usize {
        (self.router.hash_one(key) % self.partitions.len() as u64) as usize
    }

    fn partition(&self, key: &K) -> &Arc<Partition<K, V, E>> {
        &self.partitions[self.partition_of(key)]
    }

    /// Retrieves a value from the cache.
    ///
    /// Returns `None` if the key is absent or its deadline has passed. An
    /// expired entry reads as absent even before the purger removes it.
    ///
    /// # Examples
    ///
    /// ```
    /// use corral::{Cache, Expiration};
    /// use tick::Clock;
    /// # futures::executor::block_on(async {
    ///
    /// let clock = Clock::new_frozen();
    /// let cache = Cache::builder::<String, i32, String>(clock).build();
    ///
    /// assert_eq!(cache.get(&"missing".to_string()).await, None);
    ///
    /// cache.put(&"k".to_string(), 42, Expiration::Never).await;
    /// assert_eq!(cache.get(&"k".to_string()).await, Some(42));
    /// # });
    /// ```
    pub async fn get(&self, key: &K) -> Option<V> {
        let watch = self.clock.stopwatch();
        let lookup = self.partition(key).store().lookup(key, self.clock.instant());
        self.telemetry
            .record(self.name, CacheOperation::Get, lookup_activity(&lookup), Some(watch.elapsed()));
        lookup.into_value()
    }

    /// Installs a value unless a live entry is already present.
    ///
    /// `put` is a best-effort installation that loses races to any
    /// concurrent fill: if a live entry exists the call is a no-op, and
    /// that outcome is deliberately masked: overwriting here would let a
    /// caller clobber a value some owner just produced for its waiters.
    /// First write wins until expiration.
    pub async fn put(&self, key: &K, value: V, expiration: Expiration) {
        let now = self.clock.instant();
        let installed = self
            .partition(key)
            .store()
            .insert_if_absent(key.clone(), value, expiration.deadline(now), now);

        let activity = if installed { CacheActivity::Inserted } else { CacheActivity::AlreadyPresent };
        self.telemetry.record(self.name, CacheOperation::Put, activity, None);
        self.telemetry.record_size(self.name, self.len() as u64);
    }

    /// The stampede-safe read.
    ///
    /// On a hit the cached value is returned immediately. On a miss, one of
    /// the concurrent callers is elected owner and invokes `producer`; all
    /// others suspend until the owner's outcome is broadcast:
    ///
    /// * producer success: the value is installed (unless a concurrent
    ///   `put` won the race) and waiters re-read the store;
    /// * producer error: the same error is returned to the owner and every
    ///   waiter, verbatim;
    /// * producer panic: waiters receive
    ///   [`CacheError::CallbackFailure`]; the panic is re-raised to the
    ///   owner's caller after the key is released;
    /// * owner disappearance: waiters receive
    ///   [`CacheError::OwnerFailure`].
    ///
    /// A waiter whose follow-up lookup still misses (the value expired or
    /// was purged in between) gets [`CacheError::RetryFailure`].
    ///
    /// # Examples
    ///
    /// ```
    /// use corral::{Cache, Expiration, ReadError};
    /// use tick::Clock;
    /// # futures::executor::block_on(async {
    ///
    /// let clock = Clock::new_frozen();
    /// let cache = Cache::builder::<String, i32, String>(clock).build();
    ///
    /// let v = cache.read(&"k".to_string(), Expiration::Never, || async { Ok(7) }).await?;
    /// assert_eq!(v, 7);
    ///
    /// // Hit: the producer is not invoked again.
    /// let v = cache
    ///     .read(&"k".to_string(), Expiration::Never, || async { unreachable!() })
    ///     .await?;
    /// assert_eq!(v, 7);
    /// # Ok::<(), ReadError<String>>(())
    /// # });
    /// ```
    pub async fn read<F, Fut>(&self, key: &K, expiration: Expiration, producer: F) -> Result<V, ReadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let watch = self.clock.stopwatch();
        let partition = self.partition(key);

        let lookup = partition.store().lookup(key, self.clock.instant());
        let activity = lookup_activity(&lookup);
        if let Some(value) = lookup.into_value() {
            self.telemetry
                .record(self.name, CacheOperation::Read, activity, Some(watch.elapsed()));
            return Ok(value);
        }
        self.telemetry.record(self.name, CacheOperation::Read, activity, None);

        match Partition::admit(partition, key.clone()) {
            Admission::Owner(guard) => self.fill_as_owner(partition, key, expiration, producer, guard).await,
            Admission::Waiter(rx) => self.await_fill(partition, key, rx).await,
        }
    }

    /// The documented stampede-unsafe fast path.
    ///
    /// Same shape as [`read`](Self::read) but without coordination: on a
    /// miss the calling task invokes `producer` itself. Concurrent misses
    /// for the same key may all run their producers; whichever finishes
    /// first installs its value, later finishers are masked by
    /// `insert_if_absent`. Producer errors surface as-is.
    pub async fn dirty_read<F, Fut>(&self, key: &K, expiration: Expiration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let partition = self.partition(key);

        let lookup = partition.store().lookup(key, self.clock.instant());
        let activity = lookup_activity(&lookup);
        if let Some(value) = lookup.into_value() {
            self.telemetry.record(self.name, CacheOperation::DirtyRead, activity, None);
            return Ok(value);
        }
        self.telemetry.record(self.name, CacheOperation::DirtyRead, activity, None);

        match producer().await {
            Ok(value) => {
                let now = self.clock.instant();
                let installed = partition
                    .store()
                    .insert_if_absent(key.clone(), value.clone(), expiration.deadline(now), now);
                let activity = if installed { CacheActivity::Filled } else { CacheActivity::AlreadyPresent };
                self.telemetry.record(self.name, CacheOperation::DirtyRead, activity, None);
                Ok(value)
            }
            Err(error) => {
                self.telemetry
                    .record(self.name, CacheOperation::DirtyRead, CacheActivity::ProducerFailed, None);
                Err(error)
            }
        }
    }

    /// Removes the entry for `key`, if present.
    pub async fn delete(&self, key: &K) -> bool {
        let deleted = self.partition(key).store().delete(key);
        if deleted {
            self.telemetry.record(self.name, CacheOperation::Delete, CacheActivity::Deleted, None);
            self.telemetry.record_size(self.name, self.len() as u64);
        }
        deleted
    }

    /// Returns true if a live entry exists for `key`.
    pub async fn contains(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// Removes every entry from every partition.
    ///
    /// In-flight fills are not disturbed: their waiters resolve through the
    /// normal retry path once the owner releases.
    pub async fn clear(&self) {
        let mut removed = 0usize;
        for partition in &self.partitions {
            removed += partition.store().clear();
        }
        self.telemetry
            .record_count(self.name, CacheOperation::Clear, CacheActivity::Cleared, removed as u64, None);
        self.telemetry.record_size(self.name, 0);
    }

    /// Physical entry count across all partitions.
    ///
    /// May include expired entries that have not been purged yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.store().len()).sum()
    }

    /// Returns true if no partition holds any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fill_as_owner<F, Fut>(
        &self,
        partition: &Arc<Partition<K, V, E>>,
        key: &K,
        expiration: Expiration,
        producer: F,
        guard: OwnerGuard<K, V, E>,
    ) -> Result<V, ReadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // A fill may have completed between the miss and the election; a
        // fresh value makes the producer run spurious, so check once more.
        if let Lookup::Hit(value) = partition.store().lookup(key, self.clock.instant()) {
            guard.complete(&FillSignal::Retry);
            return Ok(value);
        }

        let watch = self.clock.stopwatch();
        match AssertUnwindSafe(producer()).catch_unwind().await {
            Ok(Ok(value)) => {
                let now = self.clock.instant();
                let installed = partition
                    .store()
                    .insert_if_absent(key.clone(), value.clone(), expiration.deadline(now), now);
                let activity = if installed { CacheActivity::Filled } else { CacheActivity::AlreadyPresent };
                self.telemetry.record(self.name, CacheOperation::Read, activity, Some(watch.elapsed()));
                self.telemetry.record_size(self.name, self.len() as u64);

                guard.complete(&FillSignal::Retry);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.telemetry
                    .record(self.name, CacheOperation::Read, CacheActivity::ProducerFailed, Some(watch.elapsed()));
                guard.complete(&FillSignal::Fail(ReadError::Producer(error.clone())));
                Err(ReadError::Producer(error))
            }
            Err(panic) => {
                self.telemetry
                    .record(self.name, CacheOperation::Read, CacheActivity::ProducerPanicked, Some(watch.elapsed()));
                guard.complete(&FillSignal::Fail(ReadError::Cache(CacheError::CallbackFailure)));
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn await_fill(
        &self,
        partition: &Arc<Partition<K, V, E>>,
        key: &K,
        rx: oneshot::Receiver<FillSignal<E>>,
    ) -> Result<V, ReadError<E>> {
        let signal = match rx.timeout(&self.clock, COORDINATION_TIMEOUT).await {
            Ok(Ok(signal)) => signal,
            // The record was dropped wholesale without a broadcast; treat it
            // like owner disappearance.
            Ok(Err(_closed)) => FillSignal::Fail(ReadError::Cache(CacheError::OwnerFailure)),
            Err(_timed_out) => {
                self.telemetry.record(self.name, CacheOperation::Read, CacheActivity::TimedOut, None);
                return Err(ReadError::Cache(CacheError::CoordinationTimeout));
            }
        };

        match signal {
            FillSignal::Retry => match partition.store().lookup(key, self.clock.instant()) {
                Lookup::Hit(value) => Ok(value),
                Lookup::Expired | Lookup::Miss => {
                    self.telemetry
                        .record(self.name, CacheOperation::Read, CacheActivity::RetryFailed, None);
                    Err(ReadError::Cache(CacheError::RetryFailure))
                }
            },
            FillSignal::Fail(error) => Err(error),
        }
    }
}

impl<K, V, E> std::fmt::Debug for Cache<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

fn lookup_activity<V>(lookup: &Lookup<V>) -> CacheActivity {
    match lookup {
        Lookup::Hit(_) => CacheActivity::Hit,
        Lookup::Expired => CacheActivity::Expired,
        Lookup::Miss => CacheActivity::Miss,
    }
}

impl<K, V, E> Drop for Cache<K, V, E> {
    fn drop(&mut self) {
        self.stop();
    }
}
