// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates stampede suppression: many concurrent readers miss the same
//! hot key, but the expensive producer runs only once.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use corral::{Cache, Expiration};
use tick::Clock;

#[tokio::main]
async fn main() {
    let clock = Clock::new_tokio();

    // dirty_read is the uncoordinated fast path: every miss fetches.
    let calls = Arc::new(AtomicU32::new(0));
    let cache = Arc::new(Cache::builder::<String, String, String>(clock.clone()).build());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .dirty_read(&"hot".to_string(), Expiration::after_millis(500), || async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok("fetched".to_string())
                })
                .await
        }));
    }
    for h in handles {
        let _ = h.await.expect("task panicked");
    }
    println!("dirty_read: {} producer call(s)", calls.load(Ordering::Relaxed));

    // read coalesces the stampede: one owner fetches, everyone else waits.
    let calls = Arc::new(AtomicU32::new(0));
    let cache = Arc::new(Cache::builder::<String, String, String>(clock).partitions(4).build());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .read(&"hot".to_string(), Expiration::after_millis(500), || async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok("fetched".to_string())
                })
                .await
        }));
    }
    for h in handles {
        let _ = h.await.expect("task panicked");
    }
    println!("read: {} producer call(s)", calls.load(Ordering::Relaxed));
}
