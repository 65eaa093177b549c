// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! One shard of the cache: a store, a single-flight coordinator, and the
//! replier that fans a fill's outcome out to its waiters.
//!
//! Partitions share no mutable state; keys are routed to exactly one
//! partition by the cache façade, and operations on different partitions
//! never synchronize with one another.

use std::{hash::Hash, sync::Arc};

use tokio::sync::oneshot;

use crate::{
    cache::CacheName,
    error::{CacheError, ReadError},
    keylock::{Acquired, FillSignal, KeyLock, OwnerToken},
    replier::Replier,
    store::Store,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

#[derive(Debug)]
pub(crate) struct Partition<K, V, E> {
    name: CacheName,
    store: Store<K, V>,
    keylock: KeyLock<K, E>,
    replier: Replier,
    telemetry: CacheTelemetry,
}

/// What the coordinator decided for a `read` that missed.
pub(crate) enum Admission<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    /// This caller runs the producer. The guard must be completed exactly
    /// once; dropping it without completion counts as owner disappearance.
    Owner(OwnerGuard<K, V, E>),

    /// Another caller is producing; the outcome arrives on this receiver.
    Waiter(oneshot::Receiver<FillSignal<E>>),
}

impl<K, V, E> Partition<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    pub(crate) fn new(name: CacheName, telemetry: CacheTelemetry) -> Self {
        Self {
            name,
            store: Store::new(),
            keylock: KeyLock::new(),
            replier: Replier::new(name, telemetry.clone()),
            telemetry,
        }
    }

    pub(crate) fn store(&self) -> &Store<K, V> {
        &self.store
    }

    /// Runs the single-flight election for `key`.
    pub(crate) fn admit(partition: &Arc<Self>, key: K) -> Admission<K, V, E>
    where
        K: Clone,
    {
        match partition.keylock.acquire(key.clone()) {
            Acquired::Owner(token) => Admission::Owner(OwnerGuard {
                partition: Arc::clone(partition),
                key: Some(key),
                token,
            }),
            Acquired::Waiter(rx) => Admission::Waiter(rx),
        }
    }

    /// Releases `key` and dispatches `signal` to the detached waiters.
    ///
    /// The keylock critical section ends before delivery starts.
    fn release(&self, key: &K, token: OwnerToken, signal: &FillSignal<E>) {
        if let Some(waiters) = self.keylock.release(key, token) {
            self.replier.deliver(signal, waiters);
        }
    }

    /// Synthesized release on owner disappearance.
    fn abandon(&self, key: &K, token: OwnerToken) {
        if let Some(waiters) = self.keylock.release(key, token) {
            self.telemetry.record(self.name, CacheOperation::Read, CacheActivity::OwnerLost, None);
            self.replier
                .deliver(&FillSignal::Fail(ReadError::Cache(CacheError::OwnerFailure)), waiters);
        }
    }
}

/// Liveness observation for an elected owner.
///
/// The owner holds this guard while the producer runs. Completing it
/// releases the key with the real outcome; dropping it without completion
/// (cancellation at an await point, task abort, a panic that unwound past
/// the owner) synthesizes an `owner_failure` release so no waiter is left
/// blocked. The owner token fences the guard: if the key was already
/// released and re-acquired by a newer round, a late drop is a no-op.
#[derive(Debug)]
pub(crate) struct OwnerGuard<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    partition: Arc<Partition<K, V, E>>,
    key: Option<K>,
    token: OwnerToken,
}

impl<K, V, E> OwnerGuard<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    /// Releases the key with the fill's outcome and disarms the guard.
    pub(crate) fn complete(mut self, signal: &FillSignal<E>) {
        if let Some(key) = self.key.take() {
            self.partition.release(&key, self.token, signal);
        }
    }
}

impl<K, V, E> Drop for OwnerGuard<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.partition.abandon(&key, self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Arc<Partition<String, i32, ()>> {
        Arc::new(Partition::new("test", CacheTelemetry::disabled()))
    }

    fn owner(admission: Admission<String, i32, ()>) -> OwnerGuard<String, i32, ()> {
        match admission {
            Admission::Owner(guard) => guard,
            Admission::Waiter(_) => panic!("expected owner"),
        }
    }

    #[test]
    fn completed_guard_broadcasts_the_outcome() {
        let partition = partition();
        let guard = owner(Partition::admit(&partition, "k".to_string()));
        let mut rx = match Partition::admit(&partition, "k".to_string()) {
            Admission::Waiter(rx) => rx,
            Admission::Owner(_) => panic!("expected waiter"),
        };

        guard.complete(&FillSignal::Retry);
        assert!(matches!(rx.try_recv(), Ok(FillSignal::Retry)));
    }

    #[test]
    fn dropped_guard_synthesizes_owner_failure() {
        let partition = partition();
        let guard = owner(Partition::admit(&partition, "k".to_string()));
        let mut rx = match Partition::admit(&partition, "k".to_string()) {
            Admission::Waiter(rx) => rx,
            Admission::Owner(_) => panic!("expected waiter"),
        };

        drop(guard);
        match rx.try_recv() {
            Ok(FillSignal::Fail(ReadError::Cache(CacheError::OwnerFailure))) => {}
            other => panic!("expected owner failure, got {other:?}"),
        }
    }

    #[test]
    fn key_is_reacquirable_after_release() {
        let partition = partition();
        let guard = owner(Partition::admit(&partition, "k".to_string()));
        guard.complete(&FillSignal::Retry);

        // Fresh round: the next caller is elected owner again.
        assert!(matches!(Partition::admit(&partition, "k".to_string()), Admission::Owner(_)));
    }

    #[test]
    fn stale_guard_cannot_kill_a_newer_round() {
        let partition = partition();

        // First round's guard is completed, then a second round starts.
        let first = owner(Partition::admit(&partition, "k".to_string()));
        first.complete(&FillSignal::Retry);
        let _second = owner(Partition::admit(&partition, "k".to_string()));

        // A waiter of the second round must not be disturbed by anything
        // the first round left behind.
        let mut rx = match Partition::admit(&partition, "k".to_string()) {
            Admission::Waiter(rx) => rx,
            Admission::Owner(_) => panic!("expected waiter"),
        };
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }
}
