// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for constructing cache instances.

use std::{hash::Hash, marker::PhantomData, sync::Arc};

use tick::Clock;

use crate::{
    Cache,
    partition::Partition,
    purger::{PurgeInterval, Purger},
    telemetry::CacheTelemetry,
};

/// Builder for a [`Cache`].
///
/// Created by [`Cache::builder`]. Configures the partition count, the purge
/// interval, and telemetry before constructing the instance.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use corral::Cache;
/// use tick::Clock;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # let _guard = rt.enter();
/// let clock = Clock::new_frozen();
/// let cache = Cache::builder::<String, i32, String>(clock)
///     .partitions(8)
///     .purge_interval(Duration::from_millis(50))
///     .build();
/// ```
#[derive(Debug)]
pub struct CacheBuilder<K, V, E> {
    name: Option<&'static str>,
    partitions: usize,
    purge_interval: PurgeInterval,
    clock: Clock,
    telemetry: Option<CacheTelemetry>,
    _phantom: PhantomData<(K, V, E)>,
}

impl<K, V, E> CacheBuilder<K, V, E> {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            name: None,
            partitions: 1,
            purge_interval: PurgeInterval::Never,
            clock,
            telemetry: None,
            _phantom: PhantomData,
        }
    }

    /// Sets the number of partitions. Defaults to 1.
    ///
    /// Keys are routed to partitions by a stable hash; partitions never
    /// synchronize with one another, so a slow fill on one key cannot delay
    /// keys living in other partitions.
    ///
    /// # Panics
    ///
    /// Panics if `partitions` is 0.
    #[must_use]
    pub fn partitions(mut self, partitions: usize) -> Self {
        assert!(partitions > 0, "partitions must be at least 1");
        self.partitions = partitions;
        self
    }

    /// Sets how often each partition reclaims expired entries. Defaults to
    /// [`PurgeInterval::Never`].
    ///
    /// Purging is memory hygiene only: lookups treat expired entries as
    /// absent either way. When an interval is set, `build` must run inside
    /// a Tokio runtime so the purge tasks can be spawned.
    #[must_use]
    pub fn purge_interval(mut self, interval: impl Into<PurgeInterval>) -> Self {
        self.purge_interval = interval.into();
        self
    }

    /// Sets the telemetry sink and the name for this cache instance.
    ///
    /// The name identifies this instance in metric attributes and log
    /// events.
    #[must_use]
    pub fn telemetry(mut self, telemetry: CacheTelemetry, name: &'static str) -> Self {
        self.telemetry = Some(telemetry);
        self.name = Some(name);
        self
    }

    /// Returns a reference to the builder's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl<K, V, E> CacheBuilder<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Builds the cache, spawning one purge task per partition when a purge
    /// interval is configured.
    pub fn build(self) -> Cache<K, V, E> {
        let name = self.name.unwrap_or_else(short_type_name::<Cache<K, V, E>>);
        let telemetry = self.telemetry.unwrap_or_else(CacheTelemetry::disabled);

        let partitions: Vec<Arc<Partition<K, V, E>>> = (0..self.partitions)
            .map(|_| Arc::new(Partition::new(name, telemetry.clone())))
            .collect();

        let purgers = match self.purge_interval {
            PurgeInterval::Never => Vec::new(),
            PurgeInterval::Every(interval) => partitions
                .iter()
                .map(|partition| Purger::spawn(name, Arc::clone(partition), self.clock.clone(), interval, telemetry.clone()))
                .collect(),
        };

        Cache::new(name, partitions, purgers, ahash::RandomState::new(), self.clock, telemetry)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
