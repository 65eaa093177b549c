// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache reads.

use std::fmt;

/// An error raised by the cache engine itself, as opposed to one returned by
/// a producer.
///
/// Every variant describes a terminal outcome of a coordinated fill. The
/// engine never retries a producer on behalf of the caller; it only
/// guarantees that each caller receives exactly one of these outcomes (or a
/// value, or the producer's own error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CacheError {
    /// The producer panicked while computing the value. The owner's caller
    /// observes the panic itself; waiters observe this error.
    CallbackFailure,

    /// The owner disappeared (cancelled, aborted, or otherwise gone)
    /// without completing its fill. Synthesized so that no waiter is left
    /// blocked.
    OwnerFailure,

    /// The fill succeeded, but the follow-up lookup still missed. This can
    /// happen when the freshly installed entry expires or is purged before
    /// the waiter re-reads it.
    RetryFailure,

    /// A waiter spent longer than the coordination timeout without hearing
    /// from the owner. A safety net against coordinator bugs, not a normal
    /// outcome.
    CoordinationTimeout,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::CallbackFailure => "producer panicked during fill",
            Self::OwnerFailure => "fill owner disappeared without releasing",
            Self::RetryFailure => "value missing after successful fill",
            Self::CoordinationTimeout => "timed out waiting for fill coordination",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for CacheError {}

/// The error type returned by [`Cache::read`](crate::Cache::read).
///
/// A producer's own error is propagated verbatim to the owner and to every
/// waiter, which is why the producer error type `E` must be `Clone`. Engine
/// failures are tagged with a [`CacheError`] instead, since waiters cannot
/// recompute them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError<E> {
    /// The producer ran and returned this error.
    Producer(E),

    /// The engine failed to complete the fill.
    Cache(CacheError),
}

impl<E> ReadError<E> {
    /// Returns the engine-level error, if this is one.
    #[must_use]
    pub fn as_cache_error(&self) -> Option<CacheError> {
        match self {
            Self::Cache(e) => Some(*e),
            Self::Producer(_) => None,
        }
    }

    /// Returns the producer's error, if the producer reported one.
    #[must_use]
    pub fn as_producer_error(&self) -> Option<&E> {
        match self {
            Self::Producer(e) => Some(e),
            Self::Cache(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ReadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer(e) => write!(f, "producer error: {e}"),
            Self::Cache(e) => e.fmt(f),
        }
    }
}

impl<E> std::error::Error for ReadError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Producer(e) => Some(e),
            Self::Cache(e) => Some(e),
        }
    }
}
