// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Exception fingerprinting, grouping, and error-rate tracking.
//!
//! Grounded on `dashmap::DashMap` for the fingerprint → group table, the
//! same concurrent-map choice used throughout this crate
//! ([`crate::correlation`], [`crate::scope`]), and on `sha2` for the
//! fingerprint hash, already a dependency for [`crate::capture`]'s `Hash`
//! redaction strategy.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::span::ExceptionInfo;
use crate::util::time::MonotonicInstant;

const RATE_WINDOW_BUCKETS: usize = 60;

/// A stable identifier for a class of semantically equivalent exceptions
///.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

/// Strips the volatile parts of a message a human wrote once but that
/// differ on every occurrence: hex addresses, GUIDs, and quoted literals
///.
fn normalize_message(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    let mut out = String::with_capacity(message.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '"' || chars[i] == '\'' {
            let quote = chars[i];
            let mut j = i + 1;
            while j < chars.len() && chars[j] != quote {
                j += 1;
            }
            if j < chars.len() {
                out.push_str("\u{2039}\u{203A}");
                i = j + 1;
                continue;
            }
        }
        if let Some(len) = guid_len_at(&chars, i) {
            out.push_str("\u{2039}\u{203A}");
            i += len;
            continue;
        }
        if chars[i] == '0' && chars.get(i + 1) == Some(&'x') {
            let mut j = i + 2;
            while j < chars.len() && chars[j].is_ascii_hexdigit() {
                j += 1;
            }
            if j > i + 2 {
                out.push_str("\u{2039}\u{203A}");
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Returns the length of a GUID (`8-4-4-4-12` hex groups) starting at
/// `start`, if one is present there.
fn guid_len_at(chars: &[char], start: usize) -> Option<usize> {
    let group_lengths = [8, 4, 4, 4, 12];
    let mut pos = start;
    for (idx, &len) in group_lengths.iter().enumerate() {
        for _ in 0..len {
            if pos >= chars.len() || !chars[pos].is_ascii_hexdigit() {
                return None;
            }
            pos += 1;
        }
        if idx < group_lengths.len() - 1 {
            if pos >= chars.len() || chars[pos] != '-' {
                return None;
            }
            pos += 1;
        }
    }
    Some(pos - start)
}

fn fingerprint_of(exception_type: &str, message: &str, top_frame: &str) -> Fingerprint {
    let normalized = normalize_message(message);
    let mut hasher = Sha256::new();
    hasher.update(exception_type.as_bytes());
    hasher.update(b"\x01");
    hasher.update(normalized.as_bytes());
    hasher.update(b"\x01");
    hasher.update(top_frame.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    Fingerprint(hex)
}

/// An exception plus the call-site frame this crate uses for fingerprinting
/// (`Backtrace`-style frame extraction is a host concern; the top frame is
/// supplied by the caller, typically parsed from `ExceptionInfo::stacktrace`).
#[derive(Clone, Debug)]
pub struct ExceptionOccurrence {
    pub info: ExceptionInfo,
    pub top_frame: String,
}

/// One group of occurrences sharing a [`Fingerprint`].
pub struct ExceptionGroup {
    pub fingerprint: Fingerprint,
    pub sample: ExceptionOccurrence,
    count: AtomicU64,
    first_seen: MonotonicInstant,
    last_seen: std::sync::Mutex<MonotonicInstant>,
}

impl ExceptionGroup {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn first_seen(&self) -> MonotonicInstant {
        self.first_seen
    }

    pub fn last_seen(&self) -> MonotonicInstant {
        *self.last_seen.lock().expect("last_seen mutex poisoned")
    }
}

/// A 60-bucket, one-second-per-bucket sliding window of exception counts,
/// used to report an approximate errors/minute rate.
struct RateWindow {
    buckets: [AtomicU64; RATE_WINDOW_BUCKETS],
    current_bucket: AtomicU64,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            current_bucket: AtomicU64::new(0),
        }
    }

    /// Records one occurrence at `now_secs` (a monotonic seconds counter),
    /// rotating out stale buckets as time advances.
    fn record(&self, now_secs: u64) {
        let previous = self.current_bucket.swap(now_secs, Ordering::AcqRel);
        if now_secs > previous {
            let stale = now_secs.saturating_sub(previous).min(RATE_WINDOW_BUCKETS as u64);
            for offset in 0..stale {
                let stale_secs = previous + 1 + offset;
                let slot = (stale_secs % RATE_WINDOW_BUCKETS as u64) as usize;
                self.buckets[slot].store(0, Ordering::Relaxed);
            }
        }
        let slot = (now_secs % RATE_WINDOW_BUCKETS as u64) as usize;
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
    }

    fn rate_per_minute(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }
}

/// Groups exceptions by fingerprint and maintains a rolling error rate
///. Fully thread-safe.
pub struct ExceptionAggregator {
    groups: DashMap<Fingerprint, ExceptionGroup>,
    rate: RateWindow,
    started_at: MonotonicInstant,
    tracked: AtomicU32,
}

impl Default for ExceptionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionAggregator {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            rate: RateWindow::new(),
            started_at: MonotonicInstant::now(),
            tracked: AtomicU32::new(0),
        }
    }

    /// Records an occurrence, creating a new group on first sight or
    /// updating an existing group's count and `last_seen` otherwise.
    /// Returns the occurrence's fingerprint.
    pub fn record(&self, occurrence: ExceptionOccurrence) -> Fingerprint {
        let fingerprint = fingerprint_of(
            &occurrence.info.exception_type,
            &occurrence.info.message,
            &occurrence.top_frame,
        );
        let now = MonotonicInstant::now();

        self.groups
            .entry(fingerprint.clone())
            .and_modify(|group| {
                group.count.fetch_add(1, Ordering::Relaxed);
                *group.last_seen.lock().expect("last_seen mutex poisoned") = now;
            })
            .or_insert_with(|| ExceptionGroup {
                fingerprint: fingerprint.clone(),
                sample: occurrence,
                count: AtomicU64::new(1),
                first_seen: now,
                last_seen: std::sync::Mutex::new(now),
            });

        self.tracked.fetch_add(1, Ordering::Relaxed);
        self.rate.record(elapsed_secs(self.started_at, now));
        fingerprint
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn count_for(&self, fingerprint: &Fingerprint) -> u64 {
        self.groups.get(fingerprint).map(|g| g.count()).unwrap_or(0)
    }

    /// Approximate exceptions/minute over the trailing 60-second window.
    pub fn rate_per_minute(&self) -> u64 {
        self.rate.rate_per_minute()
    }

    pub fn tracked_total(&self) -> u32 {
        self.tracked.load(Ordering::Relaxed)
    }
}

fn elapsed_secs(start: MonotonicInstant, now: MonotonicInstant) -> u64 {
    let anchor = crate::util::time::new_anchor();
    crate::util::time::duration_ns(start, now, &anchor) / 1_000_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence(message: &str) -> ExceptionOccurrence {
        ExceptionOccurrence {
            info: ExceptionInfo {
                exception_type: "ValueError".to_string(),
                message: message.to_string(),
                stacktrace: None,
            },
            top_frame: "module.function".to_string(),
        }
    }

    #[test]
    fn identical_messages_share_a_fingerprint() {
        let aggregator = ExceptionAggregator::new();
        let a = aggregator.record(occurrence("missing field"));
        let b = aggregator.record(occurrence("missing field"));
        assert_eq!(a, b);
        assert_eq!(aggregator.count_for(&a), 2);
        assert_eq!(aggregator.group_count(), 1);
    }

    #[test]
    fn messages_differing_only_by_quoted_literal_share_a_fingerprint() {
        let aggregator = ExceptionAggregator::new();
        let a = aggregator.record(occurrence("user \"alice\" not found"));
        let b = aggregator.record(occurrence("user \"bob\" not found"));
        assert_eq!(a, b);
    }

    #[test]
    fn messages_differing_only_by_hex_address_share_a_fingerprint() {
        let aggregator = ExceptionAggregator::new();
        let a = aggregator.record(occurrence("segfault at 0xdeadbeef"));
        let b = aggregator.record(occurrence("segfault at 0x1234abcd"));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_exception_types_never_collide() {
        let aggregator = ExceptionAggregator::new();
        let a = aggregator.record(occurrence("boom"));
        let mut other = occurrence("boom");
        other.info.exception_type = "KeyError".to_string();
        let b = aggregator.record(other);
        assert_ne!(a, b);
    }

    #[test]
    fn rate_reflects_recorded_occurrences() {
        let aggregator = ExceptionAggregator::new();
        for i in 0..5 {
            aggregator.record(occurrence(&format!("error {i}")));
        }
        assert_eq!(aggregator.rate_per_minute(), 5);
    }
}
