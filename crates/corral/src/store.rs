// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-partition store: a read-mostly map from key to entry.
//!
//! Lookups honor deadlines observationally: an entry whose deadline has
//! passed reads as absent even if the purger has not yet removed it. The
//! store takes its lock in shared mode on the read path, so lookups never
//! block one another; writers and purges serialize among themselves.

use std::{collections::HashMap, hash::Hash, time::Instant};

use parking_lot::RwLock;

use crate::entry::CacheEntry;

/// Outcome of a deadline-honoring lookup.
///
/// `Expired` and `Miss` are equivalent for callers; they are distinguished
/// only so telemetry can tell a cold key from a stale one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup<V> {
    Hit(V),
    Expired,
    Miss,
}

impl<V> Lookup<V> {
    pub(crate) fn into_value(self) -> Option<V> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Expired | Self::Miss => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Store<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn lookup(&self, key: &K, now: Instant) -> Lookup<V> {
        match self.entries.read().get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value().clone()),
            None => Lookup::Miss,
        }
    }

    /// Installs the entry unless a live one is already present.
    ///
    /// Returns `true` when the entry was installed. An expired entry does
    /// not count as present and is replaced. The conditional insert is
    /// load-bearing: a producer that finishes late must not overwrite a
    /// fresher value installed by a later round or by an explicit `put`.
    pub(crate) fn insert_if_absent(&self, key: K, value: V, deadline: Option<Instant>, now: Instant) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => false,
            _ => {
                entries.insert(key, CacheEntry::new(value, deadline));
                true
            }
        }
    }

    pub(crate) fn delete(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes every entry whose deadline is at or before `now`.
    ///
    /// Returns the number of entries removed. Purging is memory hygiene
    /// only; lookups already treat expired entries as absent.
    pub(crate) fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.purgeable(now));
        before - entries.len()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Physical entry count. May include expired entries that have not been
    /// purged yet.
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
