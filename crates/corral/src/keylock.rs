// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-flight coordinator for one partition.
//!
//! Every state transition (owner election, waiter registration, release)
//! happens inside one mutex-guarded critical section, so acquires and
//! releases on a partition form a total order. Between any two overlapping
//! acquires on the same key, exactly one observes the key as not in flight
//! and becomes the owner; every other caller is appended to the waiter
//! queue. No per-key locks exist.
//!
//! The critical section never blocks on delivery: waiters are one-shot
//! senders, and [`KeyLock::release`] merely detaches the queue so the
//! [`Replier`](crate::replier::Replier) can drain it afterwards.

use std::{
    collections::{HashMap, hash_map},
    hash::Hash,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ReadError;

/// Identifies the producer currently authorized to fulfill a key.
///
/// Tokens are unique per partition for the lifetime of the process, which
/// fences stale owners: a guard that fires after its key was already
/// released and re-acquired cannot disturb the newer round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OwnerToken(u64);

/// The outcome an owner broadcasts to its waiters on release.
///
/// Successful fills broadcast [`Retry`](FillSignal::Retry) rather than the
/// value itself: waiters re-consult the store and observe whatever is
/// installed. That keeps the "installed value was purged before the waiter
/// re-read it" edge case explicit instead of papering over it.
#[derive(Debug, Clone)]
pub(crate) enum FillSignal<E> {
    /// The fill succeeded; look the key up again.
    Retry,

    /// The fill failed; every waiter receives this error.
    Fail(ReadError<E>),
}

pub(crate) type WaiterHandle<E> = oneshot::Sender<FillSignal<E>>;

#[derive(Debug)]
struct InFlight<E> {
    owner: OwnerToken,
    waiters: Vec<WaiterHandle<E>>,
}

/// What [`KeyLock::acquire`] decided for the caller.
#[derive(Debug)]
pub(crate) enum Acquired<E> {
    /// The caller is now the designated producer for the key and must issue
    /// exactly one release in finite time.
    Owner(OwnerToken),

    /// Another caller owns the key; await the owner's broadcast here.
    Waiter(oneshot::Receiver<FillSignal<E>>),
}

#[derive(Debug)]
pub(crate) struct KeyLock<K, E> {
    table: Mutex<Table<K, E>>,
}

#[derive(Debug)]
struct Table<K, E> {
    records: HashMap<K, InFlight<E>>,
    next_token: u64,
}

impl<K, E> KeyLock<K, E>
where
    K: Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                records: HashMap::new(),
                next_token: 0,
            }),
        }
    }

    /// Elects an owner for `key` or registers the caller as a waiter.
    pub(crate) fn acquire(&self, key: K) -> Acquired<E> {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        match table.records.entry(key) {
            hash_map::Entry::Occupied(mut record) => {
                let (tx, rx) = oneshot::channel();
                record.get_mut().waiters.push(tx);
                Acquired::Waiter(rx)
            }
            hash_map::Entry::Vacant(slot) => {
                let token = OwnerToken(table.next_token);
                table.next_token = table.next_token.wrapping_add(1);
                slot.insert(InFlight {
                    owner: token,
                    waiters: Vec::new(),
                });
                Acquired::Owner(token)
            }
        }
    }

    /// Consumes the in-flight record for `key` and returns its waiter queue.
    ///
    /// Returns `None` when the key is not in flight or when `token` is not
    /// the current owner; a stale release is a no-op. The queue is detached
    /// atomically: an acquire arriving after this call observes the key as
    /// absent and elects a fresh owner.
    pub(crate) fn release(&self, key: &K, token: OwnerToken) -> Option<Vec<WaiterHandle<E>>> {
        let mut guard = self.table.lock();
        let is_owner = guard.records.get(key).is_some_and(|record| record.owner == token);
        if is_owner {
            guard.records.remove(key).map(|record| record.waiters)
        } else {
            None
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.table.lock().records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_token<E>(acquired: Acquired<E>) -> OwnerToken {
        match acquired {
            Acquired::Owner(token) => token,
            Acquired::Waiter(_) => panic!("expected owner"),
        }
    }

    #[test]
    fn first_acquire_elects_owner() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        assert!(matches!(lock.acquire("k"), Acquired::Owner(_)));
        assert_eq!(lock.in_flight(), 1);
    }

    #[test]
    fn subsequent_acquires_become_waiters() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        let token = owner_token(lock.acquire("k"));

        assert!(matches!(lock.acquire("k"), Acquired::Waiter(_)));
        assert!(matches!(lock.acquire("k"), Acquired::Waiter(_)));

        let waiters = lock.release(&"k", token).expect("record should exist");
        assert_eq!(waiters.len(), 2);
        assert_eq!(lock.in_flight(), 0);
    }

    #[test]
    fn release_with_stale_token_is_a_noop() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        let first = owner_token(lock.acquire("k"));
        lock.release(&"k", first).expect("record should exist");

        // New round: a fresh owner holds the key.
        let second = owner_token(lock.acquire("k"));
        assert!(lock.release(&"k", first).is_none());
        assert_eq!(lock.in_flight(), 1);

        lock.release(&"k", second).expect("current owner releases");
        assert_eq!(lock.in_flight(), 0);
    }

    #[test]
    fn release_of_unknown_key_is_a_noop() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        let token = owner_token(lock.acquire("k"));
        assert!(lock.release(&"other", token).is_none());
    }

    #[test]
    fn keys_are_independent() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        assert!(matches!(lock.acquire("a"), Acquired::Owner(_)));
        assert!(matches!(lock.acquire("b"), Acquired::Owner(_)));
        assert_eq!(lock.in_flight(), 2);
    }

    #[test]
    fn queue_is_consumed_atomically_per_release() {
        let lock: KeyLock<&str, ()> = KeyLock::new();
        let token = owner_token(lock.acquire("k"));
        let _waiting = match lock.acquire("k") {
            Acquired::Waiter(rx) => rx,
            Acquired::Owner(_) => panic!("expected waiter"),
        };
        lock.release(&"k", token).expect("record should exist");

        // The next acquire starts a fresh round with an empty queue.
        let next = owner_token(lock.acquire("k"));
        let waiters = lock.release(&"k", next).expect("record should exist");
        assert!(waiters.is_empty());
    }
}
