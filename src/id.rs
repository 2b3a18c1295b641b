// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! 128-bit trace identifiers and 64-bit span identifiers.
//!
//! Grounded on `minitrace`'s `collector::id` module: a thin newtype pair plus
//! a per-thread incrementing generator for the span id so hot-path
//! allocation never touches a global lock.

use std::cell::Cell;
use std::fmt;

/// A 128-bit opaque identifier of a distributed trace. The all-zero value is
/// reserved as "invalid" and is never emitted by [`TraceId::random`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct TraceId(pub u128);

/// A 64-bit identifier of one operation within a trace. The all-zero value is
/// reserved as "invalid" and is never emitted by [`SpanId::random`] or
/// [`SpanId::next_local`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SpanId(pub u64);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    /// Cryptographically-strong random trace id, resampling on the
    /// zero-value collision (probability ~2^-128, but never returning the
    /// zero id is a hard guarantee, not a probabilistic one).
    #[inline]
    pub fn random() -> Self {
        loop {
            let v: u128 = rand::random();
            if v != 0 {
                return TraceId(v);
            }
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// The low 64 bits, decimal-formatted, for vendor systems that only
    /// accept 64-bit identifiers.
    pub fn as_u64_decimal(&self) -> String {
        ((self.0 & u64::MAX as u128) as u64).to_string()
    }
}

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    /// Cryptographically-strong random span id, resampling on zero.
    #[inline]
    pub fn random() -> Self {
        loop {
            let v: u64 = rand::random();
            if v != 0 {
                return SpanId(v);
            }
        }
    }

    /// A fast, thread-local, non-cryptographic id generator for the hot
    /// path (span creation). Each thread owns a random 32-bit prefix and a
    /// monotonically wrapping 32-bit suffix, so ids never collide across
    /// threads in practice and never require a shared atomic.
    #[inline]
    pub fn next_local() -> Self {
        LOCAL_ID_GENERATOR.with(|g| {
            let (prefix, mut suffix) = g.get();
            suffix = suffix.wrapping_add(1);
            g.set((prefix, suffix));
            let id = ((prefix as u64) << 32) | (suffix as u64);
            if id == 0 {
                SpanId(1)
            } else {
                SpanId(id)
            }
        })
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

thread_local! {
    static LOCAL_ID_GENERATOR: Cell<(u32, u32)> = Cell::new((rand::random(), 0));
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:032x})", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
