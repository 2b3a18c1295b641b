// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! The `Span` data object.
//!
//! Grounded on `minitrace::local::raw_span::RawSpan`: a plain struct carrying
//! identity, timing, and accumulated attributes/events, mutated only by the
//! thread that owns it and handed to the pipeline once closed. `scope.rs`
//! drives the policy (parent selection, sampling, tie-break); this module is
//! deliberately inert data plus the handful of append-only mutators that
//! policy calls into.

use crate::context::{SpanContext, TraceContext};
use crate::id::{SpanId, TraceId};
use crate::util::time::MonotonicInstant;

/// The kind of operation a span represents, mirroring the tracing semantic
/// conventions this crate reuses rather than replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

impl Default for SpanKind {
    fn default() -> Self {
        SpanKind::Internal
    }
}

/// A span's terminal status. `Error`'s description defaults to the
/// triggering exception's message when set via [`Span::record_exception`].
#[derive(Clone, Debug)]
pub enum Status {
    Unset,
    Ok,
    Error { description: Option<String> },
}

impl Default for Status {
    fn default() -> Self {
        Status::Unset
    }
}

/// A scalar attribute value. Deliberately small: this is an in-process span
/// attribute, not a general serialization format (see [`crate::capture`] for
/// that).
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}
impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}
impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}
impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}
impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

/// One entry in a span's event list: a name, the monotonic time it was
/// recorded, and its own small attribute set.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub name: String,
    pub time: MonotonicInstant,
    pub attributes: Vec<(String, AttributeValue)>,
}

/// The caught-exception shape `Scope::record_exception` accepts. `stacktrace` should be `None` when the
/// exception carries no frames, per the External Interfaces contract:
/// a stacktrace must never be emitted for something that was not thrown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub message: String,
    pub stacktrace: Option<String>,
}

/// A single timed operation. Created by
/// [`crate::scope::OperationScopeFactory`], mutated only by the owning
/// thread, and closed exactly once.
#[derive(Clone, Debug)]
pub struct Span {
    pub name: String,
    pub kind: SpanKind,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub start_time: MonotonicInstant,
    pub end_time: Option<MonotonicInstant>,
    pub status: Status,
    pub attributes: Vec<(String, AttributeValue)>,
    pub events: Vec<EventRecord>,
    pub links: Vec<TraceContext>,
    pub sampled: bool,
    is_closed: bool,
}

impl Span {
    pub fn new(
        name: impl Into<String>,
        kind: SpanKind,
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: Option<SpanId>,
        sampled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            trace_id,
            span_id,
            parent_span_id,
            start_time: MonotonicInstant::now(),
            end_time: None,
            status: Status::Unset,
            attributes: Vec::new(),
            events: Vec::new(),
            links: Vec::new(),
            sampled,
            is_closed: false,
        }
    }

    pub fn context(&self) -> SpanContext {
        SpanContext::new(self.trace_id, self.span_id)
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Appends or overwrites an attribute. `key` must be non-empty — callers
    /// (`Scope::with_tag`) are responsible for that validation; this method
    /// assumes it already holds.
    pub(crate) fn set_attribute(&mut self, key: String, value: AttributeValue) {
        if self.is_closed {
            return;
        }
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.attributes.push((key, value));
        }
    }

    pub(crate) fn push_event(&mut self, name: String, attributes: Vec<(String, AttributeValue)>) {
        if self.is_closed {
            return;
        }
        self.events.push(EventRecord {
            name,
            time: MonotonicInstant::now(),
            attributes,
        });
    }

    /// Appends an `exception` event and sets status to `Error` unless a
    /// terminal status is already set.
    pub(crate) fn record_exception(&mut self, info: ExceptionInfo) {
        if self.is_closed {
            return;
        }
        let mut attrs = vec![
            (
                "exception.type".to_string(),
                AttributeValue::Str(info.exception_type),
            ),
            (
                "exception.message".to_string(),
                AttributeValue::Str(info.message.clone()),
            ),
        ];
        if let Some(stacktrace) = info.stacktrace {
            attrs.push((
                "exception.stacktrace".to_string(),
                AttributeValue::Str(stacktrace),
            ));
        }
        self.push_event("exception".to_string(), attrs);
        self.set_status_if_unset(Status::Error {
            description: Some(info.message),
        });
    }

    /// Sets the terminal status exactly once; later calls are no-ops
    ///.
    pub(crate) fn set_status_if_unset(&mut self, status: Status) {
        if self.is_closed {
            return;
        }
        if self.status == Status::Unset {
            self.status = status;
        }
    }

    /// Freezes the span: records `end_time` and marks it immutable. A
    /// no-op on a span that is already closed (`end_time` is set at most
    /// once).
    pub(crate) fn close(&mut self) {
        if self.is_closed {
            return;
        }
        self.end_time = Some(MonotonicInstant::now());
        self.is_closed = true;
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Status::Unset, Status::Unset) | (Status::Ok, Status::Ok) | (Status::Error { .. }, Status::Error { .. })
        )
    }
}
impl Eq for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_span() -> Span {
        Span::new(
            "op",
            SpanKind::Internal,
            TraceId::random(),
            SpanId::random(),
            None,
            true,
        )
    }

    #[test]
    fn close_sets_end_time_exactly_once() {
        let mut span = new_span();
        span.close();
        let first = span.end_time;
        std::thread::sleep(std::time::Duration::from_millis(1));
        span.close();
        assert_eq!(span.end_time, first);
    }

    #[test]
    fn start_time_never_after_end_time() {
        let mut span = new_span();
        span.close();
        assert!(span.start_time <= span.end_time.unwrap());
    }

    #[test]
    fn succeed_after_fail_is_a_no_op() {
        let mut span = new_span();
        span.set_status_if_unset(Status::Error { description: None });
        span.set_status_if_unset(Status::Ok);
        assert_eq!(span.status, Status::Error { description: None });
    }

    #[test]
    fn mutations_after_close_are_ignored() {
        let mut span = new_span();
        span.close();
        span.set_attribute("k".to_string(), AttributeValue::Bool(true));
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn record_exception_sets_error_status_with_message() {
        let mut span = new_span();
        span.record_exception(ExceptionInfo {
            exception_type: "ValueError".to_string(),
            message: "boom".to_string(),
            stacktrace: None,
        });
        assert_eq!(
            span.status,
            Status::Error {
                description: Some("boom".to_string())
            }
        );
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].name, "exception");
    }
}
