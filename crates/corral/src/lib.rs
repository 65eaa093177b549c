// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Partitioned in-memory caching with single-flight fills.
//!
//! This crate provides a key/value cache built for hot-key read traffic:
//! - A fixed set of independent partitions, each owning its keys outright
//! - Single-flight fills: concurrent misses for one key run the producer
//!   exactly once, and every waiter observes the same outcome
//! - Supervised fault handling: producer panics and vanished owners resolve
//!   every waiter with a tagged error instead of a deadlock
//! - Deadline-based expiration with periodic background purging
//! - Built-in OpenTelemetry metrics and `tracing` events
//!
//! # Examples
//!
//! ## Stampede-safe reads
//!
//! ```
//! use corral::{Cache, Expiration};
//! use tick::Clock;
//! # futures::executor::block_on(async {
//!
//! let clock = Clock::new_frozen();
//! let cache = Cache::builder::<String, String, String>(clock).build();
//!
//! // However many callers race this read, the producer runs once.
//! let value = cache
//!     .read(&"profile:42".to_string(), Expiration::after_millis(500), || async {
//!         Ok("fetched".to_string())
//!     })
//!     .await?;
//! assert_eq!(value, "fetched");
//! # Ok::<(), corral::ReadError<String>>(())
//! # });
//! ```
//!
//! ## Expiring entries
//!
//! ```
//! use std::time::Duration;
//!
//! use corral::{Cache, Expiration};
//! use tick::ClockControl;
//! # futures::executor::block_on(async {
//!
//! let control = ClockControl::new();
//! let cache = Cache::builder::<String, i32, String>(control.to_clock()).build();
//!
//! cache.put(&"k".to_string(), 1, Expiration::after_millis(10)).await;
//! assert_eq!(cache.get(&"k".to_string()).await, Some(1));
//!
//! control.advance(Duration::from_millis(20));
//! assert_eq!(cache.get(&"k".to_string()).await, None);
//! # });
//! ```

pub mod builder;
pub mod cache;
mod entry;
mod error;
mod keylock;
mod partition;
mod purger;
mod replier;
mod store;
mod telemetry;

#[doc(inline)]
pub use builder::CacheBuilder;
#[doc(inline)]
pub use cache::Cache;
#[doc(inline)]
pub use entry::Expiration;
#[doc(inline)]
pub use error::{CacheError, ReadError};
#[doc(inline)]
pub use purger::PurgeInterval;
#[doc(inline)]
pub use telemetry::CacheTelemetry;
