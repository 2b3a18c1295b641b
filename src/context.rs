// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! W3C Trace Context parsing/serialization and vendor-header interop.
//!
//! Grounded on `minitrace`'s `SpanContext::decode_w3c_traceparent` /
//! `encode_w3c_traceparent_with_sampled` pair, extended to the full
//! `traceparent`/`tracestate` grammar and to the higher-version extension
//! point the W3C recommendation reserves, the way the OpenTelemetry Rust SDK's
//! `TraceContextPropagator` treats `version > 0`.

use crate::error::{Field, ParseError};
use crate::id::{SpanId, TraceId};

const SUPPORTED_VERSION: u8 = 0x00;
const MAX_VERSION: u8 = 0xfe;
const MAX_TRACESTATE_ENTRIES: usize = 32;
const MAX_TRACESTATE_BYTES: usize = 512;

/// A resolved `(trace_id, span_id)` pair, independent of whether it came from
/// a live [`crate::Span`] or was decoded off the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }

    /// A `SpanContext` with a freshly generated random trace id and an
    /// invalid span id, suitable for seeding a root span.
    pub fn random_root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::INVALID,
        }
    }
}

/// The propagation unit carried on the wire: trace id, span id, optional
/// parent span id, sampled flag, and opaque `tracestate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
    pub trace_state: String,
}

impl TraceContext {
    pub fn span_context(&self) -> SpanContext {
        SpanContext::new(self.trace_id, self.span_id)
    }
}

/// One `tracestate` list-member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceStateEntry {
    pub key: String,
    pub value: String,
}

/// Pure functions parsing/serializing W3C Trace Context headers and
/// generating new identifiers. Stateless by design — every method takes its
/// full input and returns its full output, so it is trivially `proptest`-able.
pub struct TraceContextCodec;

impl TraceContextCodec {
    /// Parses a `traceparent` header. The parser is total: any byte input
    /// produces `Ok` or a [`ParseError`], never a panic.
    ///
    /// Accepts exactly `00-TTTT..-SSSS..-FF` for version `00`. Versions in
    /// `01..=0xfe` are accepted with any number of additional `-`-separated
    /// trailing fields, which are parsed for the shared fixed prefix and then
    /// ignored — the W3C-documented extension point for future versions.
    /// Version `0xff` and malformed/zero ids are rejected outright.
    pub fn parse_traceparent(text: &str) -> Result<TraceContext, ParseError> {
        let mut parts = text.trim().split('-');

        let version_str = parts.next().ok_or(ParseError::MalformedField(Field::Version))?;
        if version_str.len() != 2 {
            return Err(ParseError::MalformedField(Field::Version));
        }
        let version = u8::from_str_radix(version_str, 16)
            .map_err(|_| ParseError::MalformedField(Field::Version))?;
        if version > MAX_VERSION {
            return Err(ParseError::UnsupportedVersion);
        }

        let trace_id_str = parts.next().ok_or(ParseError::MalformedField(Field::TraceId))?;
        let span_id_str = parts.next().ok_or(ParseError::MalformedField(Field::SpanId))?;
        let flags_str = parts.next().ok_or(ParseError::MalformedField(Field::Flags))?;

        if version == SUPPORTED_VERSION && parts.next().is_some() {
            // Version 00 must have exactly four fields; trailing data is malformed,
            // not a forward-compatible extension.
            return Err(ParseError::MalformedField(Field::Flags));
        }

        if trace_id_str.len() != 32 || !is_lowercase_hex(trace_id_str) {
            return Err(ParseError::MalformedField(Field::TraceId));
        }
        let trace_id = u128::from_str_radix(trace_id_str, 16)
            .map_err(|_| ParseError::MalformedField(Field::TraceId))?;
        if trace_id == 0 {
            return Err(ParseError::ZeroId(Field::TraceId));
        }

        if span_id_str.len() != 16 || !is_lowercase_hex(span_id_str) {
            return Err(ParseError::MalformedField(Field::SpanId));
        }
        let span_id = u64::from_str_radix(span_id_str, 16)
            .map_err(|_| ParseError::MalformedField(Field::SpanId))?;
        if span_id == 0 {
            return Err(ParseError::ZeroId(Field::SpanId));
        }

        if flags_str.len() != 2 || !is_lowercase_hex(flags_str) {
            return Err(ParseError::MalformedField(Field::Flags));
        }
        let flags = u8::from_str_radix(flags_str, 16)
            .map_err(|_| ParseError::MalformedField(Field::Flags))?;

        Ok(TraceContext {
            trace_id: TraceId(trace_id),
            span_id: SpanId(span_id),
            parent_span_id: None,
            sampled: flags & 0x01 != 0,
            trace_state: String::new(),
        })
    }

    /// Inverse of [`Self::parse_traceparent`] for the canonical version-00
    /// form. `ctx.span_id` is emitted as the header's span-id field (the
    /// on-wire `traceparent` always carries the *current* span as its
    /// span-id, mirroring the W3C recommendation's field name
    /// `parent-id` from the perspective of the next hop).
    pub fn format_traceparent(ctx: &TraceContext) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            ctx.trace_id.0,
            ctx.span_id.0,
            ctx.sampled as u8
        )
    }

    /// Parses a `tracestate` header per the W3C grammar: comma-separated
    /// `key=value` list members, at most 32 entries, at most 512 bytes total.
    /// Individual malformed entries are dropped silently rather than failing
    /// the whole parse.
    pub fn parse_tracestate(text: &str) -> Vec<TraceStateEntry> {
        if text.len() > MAX_TRACESTATE_BYTES {
            return Vec::new();
        }

        let mut out = Vec::new();
        for member in text.split(',') {
            if out.len() >= MAX_TRACESTATE_ENTRIES {
                break;
            }
            let member = member.trim();
            if member.is_empty() {
                continue;
            }
            let Some((key, value)) = member.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if !is_valid_tracestate_key(key) || !is_valid_tracestate_value(value) {
                continue;
            }
            out.push(TraceStateEntry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        out
    }

    pub fn format_tracestate(entries: &[TraceStateEntry]) -> String {
        entries
            .iter()
            .map(|e| format!("{}={}", e.key, e.value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Cryptographically-strong new trace id (never zero).
    pub fn new_trace_id() -> TraceId {
        TraceId::random()
    }

    /// Cryptographically-strong new span id (never zero).
    pub fn new_span_id() -> SpanId {
        SpanId::random()
    }

    /// Vendor compatibility headers emitted alongside the W3C pair when a
    /// [`VendorProfile`] is enabled. `priority` follows the
    /// common `sampling-priority` convention: `1` sampled, `0` not sampled.
    pub fn format_vendor_headers(
        ctx: &TraceContext,
        profile: &VendorProfile,
    ) -> Vec<(String, String)> {
        let priority = if ctx.sampled { "1" } else { "0" };
        vec![
            (
                format!("x-{}-trace-id", profile.name),
                ctx.trace_id.as_u64_decimal(),
            ),
            (
                format!("x-{}-parent-id", profile.name),
                ctx.span_id.0.to_string(),
            ),
            (
                format!("x-{}-sampling-priority", profile.name),
                priority.to_string(),
            ),
        ]
    }

    /// Parses vendor compatibility headers into a best-effort `TraceContext`.
    /// On ingress this is only consulted when W3C `traceparent` parsing
    /// fails; the vendor trace id is necessarily only 64 bits,
    /// so the resulting `TraceId`'s high 64 bits are zero.
    pub fn parse_vendor_headers(
        trace_id: &str,
        parent_id: &str,
        sampling_priority: Option<&str>,
    ) -> Option<TraceContext> {
        let trace_id: u64 = trace_id.trim().parse().ok()?;
        let span_id: u64 = parent_id.trim().parse().ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        let sampled = sampling_priority
            .map(|p| p.trim() != "0")
            .unwrap_or(true);
        Some(TraceContext {
            trace_id: TraceId(trace_id as u128),
            span_id: SpanId(span_id),
            parent_span_id: None,
            sampled,
            trace_state: String::new(),
        })
    }
}

/// Optional vendor compatibility profile a host opts into explicitly; the
/// crate never guesses a vendor; auto-selection is left to the exporter
/// collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VendorProfile {
    pub name: String,
}

impl VendorProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

fn is_lowercase_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_valid_tracestate_key(key: &str) -> bool {
    if key.is_empty() || key.len() > 256 {
        return false;
    }
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    key.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '*' | '/' | '@'))
}

fn is_valid_tracestate_value(value: &str) -> bool {
    if value.is_empty() || value.len() > 256 {
        return false;
    }
    value
        .bytes()
        .all(|b| (0x20..=0x7e).contains(&b) && b != b',' && b != b'=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_traceparent() {
        let p = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let ctx = TraceContextCodec::parse_traceparent(p).unwrap();
        assert_eq!(ctx.trace_id, TraceId(0x4bf92f3577b34da6a3ce929d0e0e4736));
        assert_eq!(ctx.span_id, SpanId(0x00f067aa0ba902b7));
        assert!(ctx.sampled);
        assert_eq!(TraceContextCodec::format_traceparent(&ctx), p);
    }

    #[test]
    fn rejects_zero_trace_id() {
        let p = "00-00000000000000000000000000000000-00f067aa0ba902b7-01";
        assert_eq!(
            TraceContextCodec::parse_traceparent(p),
            Err(ParseError::ZeroId(Field::TraceId))
        );
    }

    #[test]
    fn rejects_zero_span_id() {
        let p = "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01";
        assert_eq!(
            TraceContextCodec::parse_traceparent(p),
            Err(ParseError::ZeroId(Field::SpanId))
        );
    }

    #[test]
    fn rejects_unsupported_version() {
        let p = "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        assert_eq!(
            TraceContextCodec::parse_traceparent(p),
            Err(ParseError::UnsupportedVersion)
        );
    }

    #[test]
    fn ignores_trailing_fields_on_higher_version() {
        let p = "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09-extra";
        let ctx = TraceContextCodec::parse_traceparent(p).unwrap();
        assert_eq!(ctx.trace_id, TraceId(0x4bf92f3577b34da6a3ce929d0e0e4736));
    }

    #[test]
    fn rejects_trailing_fields_on_version_zero() {
        let p = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra";
        assert!(TraceContextCodec::parse_traceparent(p).is_err());
    }

    #[test]
    fn is_total_on_garbage() {
        for input in ["", "garbage", "00-", "00-xy-zz-ww", "--", "00-00-00-00-00-00-00-00"] {
            // Must never panic.
            let _ = TraceContextCodec::parse_traceparent(input);
        }
    }

    #[test]
    fn parses_tracestate_dropping_invalid_entries() {
        let entries = TraceContextCodec::parse_tracestate("vendor1=value1, bad-entry, vendor2=value2");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "vendor1");
        assert_eq!(entries[1].key, "vendor2");
    }

    #[test]
    fn tracestate_caps_entry_count() {
        let long: Vec<String> = (0..40).map(|i| format!("k{i}=v{i}")).collect();
        let entries = TraceContextCodec::parse_tracestate(&long.join(","));
        assert_eq!(entries.len(), 32);
    }

    #[test]
    fn vendor_headers_use_low_64_bits() {
        let ctx = TraceContext {
            trace_id: TraceId(0xabcdef1234567890abcdef1234567890),
            span_id: SpanId(0x1111111111111111),
            parent_span_id: None,
            sampled: true,
            trace_state: String::new(),
        };
        let profile = VendorProfile::new("acme");
        let headers = TraceContextCodec::format_vendor_headers(&ctx, &profile);
        assert_eq!(headers[0].0, "x-acme-trace-id");
        assert_eq!(headers[0].1, (ctx.trace_id.0 as u64).to_string());
        assert_eq!(headers[2].1, "1");
    }
}
