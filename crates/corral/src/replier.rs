// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delivery of fill outcomes to waiters.
//!
//! The replier runs strictly outside the coordinator's critical section: by
//! the time it sees a waiter queue, the queue has already been detached from
//! the in-flight table. One-shot sends cannot block, so a slow or vanished
//! waiter never stalls the partition or the other waiters.

use crate::{
    cache::CacheName,
    error::ReadError,
    keylock::{FillSignal, WaiterHandle},
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

#[derive(Debug)]
pub(crate) struct Replier {
    name: CacheName,
    telemetry: CacheTelemetry,
}

impl Replier {
    pub(crate) fn new(name: CacheName, telemetry: CacheTelemetry) -> Self {
        Self { name, telemetry }
    }

    /// Delivers `signal` to every waiter in the detached queue.
    ///
    /// A send fails only when the waiter has gone away (its receiver was
    /// dropped); that waiter is skipped and its handle reclaimed, without
    /// affecting delivery to the rest.
    pub(crate) fn deliver<E: Clone>(&self, signal: &FillSignal<E>, waiters: Vec<WaiterHandle<E>>) {
        if waiters.is_empty() {
            return;
        }

        let total = waiters.len();
        let mut delivered = 0usize;
        for waiter in waiters {
            if waiter.send(signal.clone()).is_ok() {
                delivered += 1;
            }
        }

        tracing::trace!(
            cache.name = self.name,
            waiters = total,
            delivered,
            outcome = ?outcome_label(signal),
            "fill outcome dispatched"
        );

        if delivered > 0 {
            self.telemetry
                .record_count(self.name, CacheOperation::Read, CacheActivity::Coalesced, delivered as u64, None);
        }
    }
}

fn outcome_label<E>(signal: &FillSignal<E>) -> &'static str {
    match signal {
        FillSignal::Retry => "retry",
        FillSignal::Fail(ReadError::Producer(_)) => "producer_error",
        FillSignal::Fail(ReadError::Cache(e)) => match e {
            crate::error::CacheError::CallbackFailure => "callback_failure",
            crate::error::CacheError::OwnerFailure => "owner_failure",
            crate::error::CacheError::RetryFailure => "retry_failure",
            crate::error::CacheError::CoordinationTimeout => "coordination_timeout",
        },
    }
}
