// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Monotonic span timing, grounded on `minitrace`'s use of `minstant` for a
//! cheap, TSC-backed clock plus an `Anchor` to translate a monotonic instant
//! back to unix-epoch nanoseconds only once, at the point spans are merged
//! for export — not on every `Instant::now()` call.

use minstant::{Anchor, Instant};

/// Wraps `minstant::Instant` so the rest of the crate depends on this module,
/// not directly on the clock crate, matching `minitrace::local::raw_span`'s
/// `begin_instant`/`end_instant` fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    #[inline]
    pub fn now() -> Self {
        MonotonicInstant(Instant::now())
    }

    #[inline]
    pub fn as_unix_nanos(&self, anchor: &Anchor) -> u64 {
        self.0.as_unix_nanos(anchor)
    }
}

/// Nanosecond duration between two instants, computed via a shared anchor —
/// `minstant::Instant` exposes no direct subtraction, so durations are
/// derived the same way `minitrace`'s `amend_span` does: convert both ends to
/// unix nanos first, then saturating-subtract.
pub fn duration_ns(begin: MonotonicInstant, end: MonotonicInstant, anchor: &Anchor) -> u64 {
    end.as_unix_nanos(anchor)
        .saturating_sub(begin.as_unix_nanos(anchor))
}

/// Creates a fresh anchor for converting a batch of `MonotonicInstant`s to
/// unix-epoch nanoseconds. Cheap enough to call once per flush batch.
pub fn new_anchor() -> Anchor {
    Anchor::new()
}
