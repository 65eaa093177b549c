// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Background expiration purging.
//!
//! One task per partition wakes every purge interval and reclaims entries
//! whose deadline has passed. Purging is memory hygiene only (lookups
//! already treat expired entries as absent), so intervals are "at least":
//! a purge delayed under load is harmless.

use std::{hash::Hash, sync::Arc, time::Duration};

use futures::StreamExt;
use tick::{Clock, PeriodicTimer};
use tokio::task::JoinHandle;

use crate::{
    cache::CacheName,
    partition::Partition,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

/// How often a partition reclaims expired entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeInterval {
    /// No background purging. Deadlines are still honored by lookups.
    Never,

    /// Purge at least this often. Periods below one millisecond are raised
    /// to one millisecond, the timer's minimum precision.
    Every(Duration),
}

impl From<Duration> for PurgeInterval {
    fn from(interval: Duration) -> Self {
        Self::Every(interval)
    }
}

/// Handle to one partition's purge task. Aborts the task when stopped or
/// dropped.
#[derive(Debug)]
pub(crate) struct Purger {
    handle: JoinHandle<()>,
}

impl Purger {
    /// Spawns the purge loop onto the ambient Tokio runtime.
    pub(crate) fn spawn<K, V, E>(
        name: CacheName,
        partition: Arc<Partition<K, V, E>>,
        clock: Clock,
        interval: Duration,
        telemetry: CacheTelemetry,
    ) -> Self
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut timer = PeriodicTimer::new(&clock, interval);
            while timer.next().await.is_some() {
                let purged = partition.store().purge_expired(clock.instant());
                if purged > 0 {
                    telemetry.record_count(name, CacheOperation::Purge, CacheActivity::Purged, purged as u64, None);
                }
            }
        });
        Self { handle }
    }

    pub(crate) fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Purger {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
