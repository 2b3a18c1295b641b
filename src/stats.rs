// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Lock-free statistics counters.
//!
//! Grounded on `minitrace::collector::global_collector`'s
//! `NEXT_COLLECT_ID: AtomicU32` pattern: plain `std::sync::atomic` counters,
//! no crate needed for monotonic counts that are read far more often than
//! they are written.

use std::sync::atomic::{AtomicU64, Ordering};

/// Wait-free counters tracking the health of the whole telemetry subsystem.
/// Reads are consistent per-counter, not across counters — there is
/// deliberately no promise of a single atomic snapshot across fields.
#[derive(Debug, Default)]
pub struct Statistics {
    activities_created: AtomicU64,
    activities_completed: AtomicU64,
    items_enqueued: AtomicU64,
    items_processed: AtomicU64,
    items_dropped: AtomicU64,
    restarts: AtomicU64,
    exceptions_tracked: AtomicU64,
    correlation_ids_generated: AtomicU64,
    max_queue_depth: AtomicU64,
    internal_errors: AtomicU64,
}

/// A point-in-time read of every counter. Not atomic across fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub activities_created: u64,
    pub activities_completed: u64,
    pub items_enqueued: u64,
    pub items_processed: u64,
    pub items_dropped: u64,
    pub restarts: u64,
    pub exceptions_tracked: u64,
    pub correlation_ids_generated: u64,
    pub max_queue_depth: u64,
    pub internal_errors: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_activity_created(&self) {
        self.activities_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_activity_completed(&self) {
        self.activities_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_item_enqueued(&self) {
        self.items_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_item_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_item_dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exception_tracked(&self) {
        self.exceptions_tracked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_correlation_id_generated(&self) {
        self.correlation_ids_generated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the high-watermark queue depth. Only ever moves up.
    #[inline]
    pub fn observe_queue_depth(&self, depth: u64) {
        let mut current = self.max_queue_depth.load(Ordering::Relaxed);
        while depth > current {
            match self.max_queue_depth.compare_exchange_weak(
                current,
                depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            activities_created: self.activities_created.load(Ordering::Relaxed),
            activities_completed: self.activities_completed.load(Ordering::Relaxed),
            items_enqueued: self.items_enqueued.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            exceptions_tracked: self.exceptions_tracked.load(Ordering::Relaxed),
            correlation_ids_generated: self.correlation_ids_generated.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero. After a reset, counters resume their
    /// monotonic-non-decreasing contract from zero.
    pub fn reset(&self) {
        self.activities_created.store(0, Ordering::Relaxed);
        self.activities_completed.store(0, Ordering::Relaxed);
        self.items_enqueued.store(0, Ordering::Relaxed);
        self.items_processed.store(0, Ordering::Relaxed);
        self.items_dropped.store(0, Ordering::Relaxed);
        self.restarts.store(0, Ordering::Relaxed);
        self.exceptions_tracked.store(0, Ordering::Relaxed);
        self.correlation_ids_generated.store(0, Ordering::Relaxed);
        self.max_queue_depth.store(0, Ordering::Relaxed);
        self.internal_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_is_at_least_completed() {
        let stats = Statistics::new();
        for _ in 0..5 {
            stats.record_activity_created();
        }
        for _ in 0..3 {
            stats.record_activity_completed();
        }
        let snap = stats.snapshot();
        assert!(snap.activities_created >= snap.activities_completed);
    }

    #[test]
    fn quiescence_implies_equality() {
        let stats = Statistics::new();
        for _ in 0..10 {
            stats.record_activity_created();
            stats.record_activity_completed();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.activities_created, snap.activities_completed);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = Statistics::new();
        stats.record_activity_created();
        stats.record_item_dropped();
        stats.reset();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn queue_depth_only_moves_up() {
        let stats = Statistics::new();
        stats.observe_queue_depth(5);
        stats.observe_queue_depth(2);
        stats.observe_queue_depth(9);
        assert_eq!(stats.snapshot().max_queue_depth, 9);
    }
}
