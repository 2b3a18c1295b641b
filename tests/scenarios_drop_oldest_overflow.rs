// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Scenario: a bounded worker under sustained
//! overflow always accepts new items and drops the oldest to make room.
//!
//! Runs on the default single-threaded `#[tokio::test]` runtime so the
//! freshly spawned consumer task cannot steal a turn until this test
//! explicitly yields, making the "blocked consumer" setup deterministic
//! rather than a race against a second worker thread.

use std::sync::{Arc, Mutex};

use scopeline::pipeline::{BackgroundWorkerConfig, Cancel, WorkItem};
use scopeline::prelude::*;

struct OrderedItem {
    n: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl WorkItem for OrderedItem {
    fn operation_type(&self) -> &str {
        "test.ordered"
    }

    fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.lock().unwrap().push(self.n);
        Ok(())
    }
}

#[tokio::test]
async fn overflow_drops_oldest_and_never_rejects() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stats = Arc::new(Statistics::new());
    let worker = BackgroundWorker::spawn(
        BackgroundWorkerConfig {
            capacity: 3,
            ..Default::default()
        },
        stats.clone(),
    );

    let mut all_accepted = true;
    for n in 1..=10u32 {
        all_accepted &= worker.try_enqueue(Box::new(OrderedItem {
            n,
            log: log.clone(),
        }));
    }
    assert!(all_accepted, "try_enqueue must never reject, even under overflow");
    assert_eq!(stats.snapshot().items_dropped, 7);

    worker
        .flush(std::time::Duration::from_secs(1), Cancel::new())
        .await;

    assert_eq!(*log.lock().unwrap(), vec![8, 9, 10]);
}
