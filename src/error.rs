// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Error taxonomy.
//!
//! Only the boundaries that validate *caller input* return `Result`. Nothing
//! on the hot path (`begin`, `with_tag`, `record_event`, `try_enqueue`) is
//! fallible: misuse there degrades to a no-op span or a dropped item, never
//! a `Result`, because the library must never make the host fail.

use thiserror::Error;

/// Which field of a `traceparent`/`tracestate` header failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Version,
    TraceId,
    SpanId,
    Flags,
    TraceState,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Field::Version => "version",
            Field::TraceId => "trace-id",
            Field::SpanId => "span-id",
            Field::Flags => "flags",
            Field::TraceState => "tracestate",
        };
        f.write_str(s)
    }
}

/// Errors from [`crate::context::TraceContextCodec`]. The parser is total: every
/// byte sequence produces either an `Ok` or one of these variants, never a panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed {0} field")]
    MalformedField(Field),
    #[error("{0} must not be all zeros")]
    ZeroId(Field),
    #[error("unsupported traceparent version")]
    UnsupportedVersion,
}

/// Errors surfaced synchronously at `ConfigurationProvider::apply`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sampling_rate {0} is outside [0, 1]")]
    InvalidSamplingRate(f64),
    #[error("invalid namespace pattern: {0}")]
    InvalidPattern(String),
}

/// User errors reported synchronously at public-API boundaries.
/// These never produce telemetry of their own; they are the caller's mistake,
/// not the host's runtime behavior.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("capacity must be at least 1")]
    InvalidCapacity,
    #[error("operation name must not be empty")]
    ZeroLengthName,
    #[error("sampling rate {0} is outside [0, 1]")]
    SamplingRateOutOfRange(f64),
    #[error("tag key must not be empty")]
    EmptyTagKey,
}
