// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Scenario: formatting the active span's context
//! as a `traceparent` header for an outbound call.

use scopeline::prelude::*;

struct DropDispatcher;
impl SpanDispatcher for DropDispatcher {
    fn dispatch(&self, _span: Span) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

#[test]
fn active_scope_formats_outbound_traceparent() {
    let stats = std::sync::Arc::new(Statistics::new());
    let worker = BackgroundWorker::new_detached(stats.clone());
    let factory = OperationScopeFactory::new(
        std::sync::Arc::new(ConfigurationProvider::new()),
        worker,
        std::sync::Arc::new(AlwaysOnSampler),
        std::sync::Arc::new(DropDispatcher),
        stats,
    );

    let scope = factory.begin(
        "call_downstream",
        BeginOptions {
            kind: SpanKind::Client,
            parent_override: Some(ParentOverride {
                trace_id: TraceId(0xabcdef1234567890abcdef1234567890),
                parent_span_id: None,
                sampled: true,
            }),
            ..Default::default()
        },
    );

    // A sampled, deterministic child would normally get a random span id;
    // this scenario pins it to the documented value to check the header
    // shape, so build the context by hand from the scope's trace id.
    let ctx = TraceContext {
        trace_id: scope.context().unwrap().trace_id,
        span_id: SpanId(0x1111111111111111),
        parent_span_id: None,
        sampled: true,
        trace_state: String::new(),
    };

    let header = TraceContextCodec::format_traceparent(&ctx);
    assert_eq!(
        header,
        "00-abcdef1234567890abcdef1234567890-1111111111111111-01"
    );
}
