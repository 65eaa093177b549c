// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache entries and the expiration encoding.

use std::time::{Duration, Instant};

/// How long an inserted value stays live.
///
/// Deadlines are computed against the cache's [`Clock`](tick::Clock) at
/// insertion time, on the monotonic instant scale, so wall-clock jumps never
/// expire (or resurrect) an entry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use corral::Expiration;
///
/// let short = Expiration::after_millis(250);
/// let long: Expiration = Duration::from_secs(3600).into();
/// let pinned = Expiration::Never;
/// # let _ = (short, long, pinned);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// The entry never expires; only an explicit delete removes it.
    Never,

    /// The entry expires this long after insertion. Must be non-zero; a
    /// zero duration is rejected when the deadline is computed.
    After(Duration),
}

impl Expiration {
    /// Expiration after the given number of milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if `millis` is 0.
    #[must_use]
    pub fn after_millis(millis: u64) -> Self {
        assert!(millis > 0, "expiration must be non-zero");
        Self::After(Duration::from_millis(millis))
    }

    /// The absolute deadline for an entry inserted at `now`, or `None` for
    /// non-expiring entries.
    ///
    /// # Panics
    ///
    /// Panics on a zero [`After`](Self::After) duration, which the variant
    /// rules out but cannot enforce at construction.
    pub(crate) fn deadline(self, now: Instant) -> Option<Instant> {
        match self {
            Self::Never => None,
            Self::After(ttl) => {
                assert!(!ttl.is_zero(), "expiration must be non-zero");
                now.checked_add(ttl)
            }
        }
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        Self::After(ttl)
    }
}

/// A stored value plus its optional deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheEntry<V> {
    value: V,
    deadline: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, deadline: Option<Instant>) -> Self {
        Self { value, deadline }
    }

    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    /// An entry is expired for lookups only once its deadline is strictly in
    /// the past. The purger uses the inclusive [`Self::purgeable`] test.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    pub(crate) fn purgeable(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_has_no_deadline() {
        let now = Instant::now();
        assert_eq!(Expiration::Never.deadline(now), None);
    }

    #[test]
    fn after_deadline_is_relative_to_now() {
        let now = Instant::now();
        let deadline = Expiration::after_millis(10).deadline(now);
        assert_eq!(deadline, Some(now + Duration::from_millis(10)));
    }

    #[test]
    #[should_panic(expected = "expiration must be non-zero")]
    fn zero_millis_is_rejected_at_construction() {
        let _ = Expiration::after_millis(0);
    }

    #[test]
    #[should_panic(expected = "expiration must be non-zero")]
    fn zero_duration_is_rejected_at_deadline_computation() {
        let _ = Expiration::After(Duration::ZERO).deadline(Instant::now());
    }

    #[test]
    fn expiry_boundary_is_exclusive_for_lookups_inclusive_for_purges() {
        let now = Instant::now();
        let entry = CacheEntry::new(1, Some(now));

        // Exactly at the deadline: still readable, already purgeable.
        assert!(!entry.is_expired(now));
        assert!(entry.purgeable(now));

        let later = now + Duration::from_millis(1);
        assert!(entry.is_expired(later));
        assert!(entry.purgeable(later));
    }

    #[test]
    fn non_expiring_entry_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new("v", None);
        assert!(!entry.is_expired(now + Duration::from_secs(3600)));
        assert!(!entry.purgeable(now + Duration::from_secs(3600)));
    }
}
