// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry: OpenTelemetry metrics plus `tracing` events.
//!
//! Every partition-level event funnels through [`CacheTelemetry`]. When the
//! cache is built without telemetry, recording is a no-op.

use std::{sync::Arc, time::Duration};

use opentelemetry::{KeyValue, logs::Severity, metrics::Meter};

use crate::cache::CacheName;

pub(crate) mod attributes;
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// Telemetry sink for cache events.
///
/// Wraps an optional OpenTelemetry meter and a logging switch. Construct one
/// and pass it to the builder via
/// [`telemetry()`](crate::builder::CacheBuilder::telemetry).
///
/// Recording is cheap when disabled: every instrument is `None` and the
/// logging branch is a single boolean test.
#[derive(Clone, Debug)]
pub struct CacheTelemetry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    logging_enabled: bool,
    event_counter: Option<opentelemetry::metrics::Counter<u64>>,
    operation_duration: Option<opentelemetry::metrics::Histogram<f64>>,
    cache_size: Option<opentelemetry::metrics::Gauge<u64>>,
}

impl CacheTelemetry {
    /// Creates a telemetry sink.
    ///
    /// * `logging_enabled` - emit `tracing` events for cache activity.
    /// * `meter` - record OpenTelemetry metrics; `None` disables them.
    #[must_use]
    pub fn new(logging_enabled: bool, meter: Option<&Meter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                logging_enabled,
                event_counter: meter.map(metrics::create_event_counter),
                operation_duration: meter.map(metrics::create_operation_duration_histogram),
                cache_size: meter.map(metrics::create_cache_size_gauge),
            }),
        }
    }

    /// A sink that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    pub(crate) fn record(&self, cache_name: CacheName, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        self.record_count(cache_name, operation, activity, 1, duration);
    }

    pub(crate) fn record_count(
        &self,
        cache_name: CacheName,
        operation: CacheOperation,
        activity: CacheActivity,
        count: u64,
        duration: Option<Duration>,
    ) {
        let attrs = [
            KeyValue::new(attributes::CACHE_NAME, cache_name),
            KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
        ];

        if let Some(c) = &self.inner.event_counter {
            c.add(count, &attrs);
        }

        if let (Some(d), Some(h)) = (duration, &self.inner.operation_duration) {
            h.record(d.as_secs_f64(), &attrs);
        }

        if self.inner.logging_enabled {
            Self::emit(cache_name, operation, activity, count, duration);
        }
    }

    pub(crate) fn record_size(&self, cache_name: CacheName, size: u64) {
        if let Some(g) = &self.inner.cache_size {
            g.record(size, &[KeyValue::new(attributes::CACHE_NAME, cache_name)]);
        }
    }

    fn emit(cache_name: CacheName, operation: CacheOperation, activity: CacheActivity, count: u64, duration: Option<Duration>) {
        let op = operation.as_str();
        let act = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Tracing levels must be constant, hence the macro dispatch. Field
        // names mirror the attribute constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = act,
                    cache.count = count,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                )
            };
        }

        match activity.severity() {
            Severity::Error => emit_event!(error),
            Severity::Info => emit_event!(info),
            Severity::Debug => emit_event!(debug),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheOperation {
    Get,
    Put,
    Read,
    DirtyRead,
    Delete,
    Clear,
    Purge,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Put => "cache.put",
            Self::Read => "cache.read",
            Self::DirtyRead => "cache.dirty_read",
            Self::Delete => "cache.delete",
            Self::Clear => "cache.clear",
            Self::Purge => "cache.purge",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheActivity {
    /// A live entry satisfied the lookup.
    Hit,
    /// No entry for the key.
    Miss,
    /// An entry existed but its deadline had passed.
    Expired,
    /// An explicit `put` installed an entry.
    Inserted,
    /// A `put` or fill lost to a live entry and was masked.
    AlreadyPresent,
    /// An entry was removed by `delete`.
    Deleted,
    /// A producer's value was installed by a fill.
    Filled,
    /// Waiters were handed a fill outcome they did not compute.
    Coalesced,
    /// The producer returned an error.
    ProducerFailed,
    /// The producer panicked.
    ProducerPanicked,
    /// The fill owner disappeared without releasing.
    OwnerLost,
    /// The post-fill lookup still missed.
    RetryFailed,
    /// A waiter hit the coordination timeout.
    TimedOut,
    /// Expired entries were reclaimed by the purger.
    Purged,
    /// The store was cleared.
    Cleared,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Inserted => "cache.inserted",
            Self::AlreadyPresent => "cache.already_present",
            Self::Deleted => "cache.deleted",
            Self::Filled => "cache.filled",
            Self::Coalesced => "cache.coalesced",
            Self::ProducerFailed => "cache.producer_failed",
            Self::ProducerPanicked => "cache.producer_panicked",
            Self::OwnerLost => "cache.owner_lost",
            Self::RetryFailed => "cache.retry_failed",
            Self::TimedOut => "cache.timed_out",
            Self::Purged => "cache.purged",
            Self::Cleared => "cache.cleared",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::Coalesced => Severity::Debug,
            Self::Expired | Self::Inserted | Self::AlreadyPresent | Self::Deleted | Self::Filled | Self::Purged | Self::Cleared => {
                Severity::Info
            }
            Self::ProducerFailed | Self::ProducerPanicked | Self::OwnerLost | Self::RetryFailed | Self::TimedOut => Severity::Error,
        }
    }
}
