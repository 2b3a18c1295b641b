// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Operation scopes: the owning handle over a [`Span`] whose lifetime is
//! tied to a bounded region of control flow.
//!
//! The open-span stack mirrors `minitrace::local::local_span_stack`'s
//! thread-local `Rc<RefCell<LocalSpanStack>>`, generalized through
//! [`crate::flow`] the same way [`crate::correlation`] is, so a span opened
//! before an `.await` is still found as the current parent after the task
//! resumes on a different worker thread.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use tracing::trace;

use crate::config::{ConfigLayer, ConfigurationProvider};
use crate::context::SpanContext;
use crate::flow::{current_flow_key, FlowKey};
use crate::id::{SpanId, TraceId};
use crate::pipeline::{BackgroundWorker, WorkItem};
use crate::span::{AttributeValue, ExceptionInfo, Span, SpanKind, Status};
use crate::stats::Statistics;

/// A sampler's verdict for a newly created span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    Drop,
    RecordOnly,
    RecordAndExport,
}

/// Consulted once per span creation with the information available at that
/// point. Dropped spans still participate in the parent/child chain; they
/// are simply never hand off to the pipeline.
pub trait Sampler: Send + Sync {
    fn decide(
        &self,
        trace_id: TraceId,
        parent_sampled: bool,
        name: &str,
        kind: SpanKind,
        attributes_at_start: &[(String, AttributeValue)],
    ) -> SamplingDecision;
}

/// Records and exports every span. Suitable as a default when no sampling
/// policy has been configured.
pub struct AlwaysOnSampler;

impl Sampler for AlwaysOnSampler {
    fn decide(
        &self,
        _trace_id: TraceId,
        _parent_sampled: bool,
        _name: &str,
        _kind: SpanKind,
        _attributes_at_start: &[(String, AttributeValue)],
    ) -> SamplingDecision {
        SamplingDecision::RecordAndExport
    }
}

/// A head-based ratio sampler: any span whose parent was sampled is always
/// recorded and exported; otherwise a fraction `ratio` of root-ish spans
/// are, chosen deterministically from the low bits of the trace id so the
/// same trace consistently samples the same way.
pub struct RatioSampler {
    threshold: u64,
}

impl RatioSampler {
    pub fn new(ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        Self {
            threshold: (ratio * u64::MAX as f64) as u64,
        }
    }
}

impl Sampler for RatioSampler {
    fn decide(
        &self,
        trace_id: TraceId,
        parent_sampled: bool,
        _name: &str,
        _kind: SpanKind,
        _attributes_at_start: &[(String, AttributeValue)],
    ) -> SamplingDecision {
        if parent_sampled {
            return SamplingDecision::RecordAndExport;
        }
        if (trace_id.0 as u64) < self.threshold {
            SamplingDecision::RecordAndExport
        } else {
            SamplingDecision::Drop
        }
    }
}

/// Accepts a closed span for asynchronous delivery. Supplied by the host at
/// [`OperationScopeFactory`] construction time; the crate does not prescribe
/// an export wire format.
pub trait SpanDispatcher: Send + Sync {
    fn dispatch(&self, span: Span) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct SpanWorkItem {
    span: Span,
    dispatcher: Arc<dyn SpanDispatcher>,
}

impl WorkItem for SpanWorkItem {
    fn operation_type(&self) -> &str {
        &self.span.name
    }

    fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.dispatcher.dispatch(self.span)
    }
}

#[derive(Clone, Copy)]
struct OpenFrame {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
}

static OPEN_SPANS: Lazy<DashMap<FlowKey, Vec<OpenFrame>>> = Lazy::new(DashMap::new);

fn push_open_frame(frame: OpenFrame) {
    OPEN_SPANS.entry(current_flow_key()).or_default().push(frame);
}

fn pop_open_frame() {
    let key = current_flow_key();
    if let Some(mut frames) = OPEN_SPANS.get_mut(&key) {
        frames.pop();
        if frames.is_empty() {
            drop(frames);
            OPEN_SPANS.remove(&key);
        }
    }
}

fn current_open_frame() -> Option<OpenFrame> {
    OPEN_SPANS.get(&current_flow_key()).and_then(|f| f.last().copied())
}

/// The current flow's innermost open span, if any. External collaborators
/// (HTTP/RPC egress hooks) use this to read the active trace/span id pair
/// without reaching into private fields.
pub fn current_span_context() -> Option<SpanContext> {
    current_open_frame().map(|f| SpanContext::new(f.trace_id, f.span_id))
}

/// An explicit parent to seed a root scope from — typically a parsed
/// inbound `TraceContext` — overriding whatever is on the open-span stack.
#[derive(Clone, Copy, Debug)]
pub struct ParentOverride {
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
}

/// Options accepted by [`OperationScopeFactory::begin`].
pub struct BeginOptions {
    pub kind: SpanKind,
    pub parent_override: Option<ParentOverride>,
    pub type_name: String,
    pub method_name: Option<String>,
    pub call_overrides: Option<ConfigLayer>,
    pub tags: Vec<(String, AttributeValue)>,
}

impl Default for BeginOptions {
    fn default() -> Self {
        Self {
            kind: SpanKind::Internal,
            parent_override: None,
            type_name: String::new(),
            method_name: None,
            call_overrides: None,
            tags: Vec::new(),
        }
    }
}

/// Opens spans, links them to the current span, applies sampling and owns
/// the collaborators a [`Scope`] needs at close time.
#[derive(Clone)]
pub struct OperationScopeFactory {
    config: Arc<ConfigurationProvider>,
    worker: BackgroundWorker,
    sampler: Arc<dyn Sampler>,
    dispatcher: Arc<dyn SpanDispatcher>,
    stats: Arc<Statistics>,
}

impl OperationScopeFactory {
    pub fn new(
        config: Arc<ConfigurationProvider>,
        worker: BackgroundWorker,
        sampler: Arc<dyn Sampler>,
        dispatcher: Arc<dyn SpanDispatcher>,
        stats: Arc<Statistics>,
    ) -> Self {
        Self {
            config,
            worker,
            sampler,
            dispatcher,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// Opens a span named `name`. Returns a no-op scope, satisfying the full
    /// interface at near-zero cost, when the effective configuration
    /// disables the call site.
    pub fn begin(&self, name: &str, options: BeginOptions) -> Scope {
        let method_name = options.method_name.as_deref().unwrap_or(name);
        let config = self.config.resolve_with_overrides(
            &options.type_name,
            method_name,
            options.call_overrides.as_ref(),
        );
        if !config.enabled {
            return Scope::noop(self.clone());
        }

        let (trace_id, parent_span_id, parent_sampled) = match options.parent_override {
            Some(p) => (p.trace_id, p.parent_span_id, p.sampled),
            None => match current_open_frame() {
                Some(frame) => (frame.trace_id, Some(frame.span_id), frame.sampled),
                None => (TraceId::random(), None, false),
            },
        };
        let span_id = SpanId::next_local();

        let decision = self
            .sampler
            .decide(trace_id, parent_sampled, name, options.kind, &options.tags);
        let sampled = decision == SamplingDecision::RecordAndExport;

        let mut span = Span::new(name, options.kind, trace_id, span_id, parent_span_id, sampled);
        for (k, v) in config.tags {
            span.set_attribute(k, AttributeValue::Str(v));
        }
        for (k, v) in options.tags {
            span.set_attribute(k, v);
        }

        self.stats.record_activity_created();
        push_open_frame(OpenFrame {
            trace_id,
            span_id,
            sampled,
        });

        Scope {
            factory: self.clone(),
            state: ScopeState::Active {
                span,
                enqueue: decision != SamplingDecision::Drop,
                record_exceptions: config.record_exceptions,
            },
            popped: false,
        }
    }
}

static GLOBAL_FACTORY: OnceCell<OperationScopeFactory> = OnceCell::new();

/// Installs the process-wide default factory that `#[instrument]`-generated
/// code and [`Scope::begin_with_local_parent`] use. May only be called once;
/// returns the rejected factory otherwise.
pub fn init(factory: OperationScopeFactory) -> Result<(), OperationScopeFactory> {
    GLOBAL_FACTORY.set(factory)
}

fn global_factory() -> Option<&'static OperationScopeFactory> {
    GLOBAL_FACTORY.get()
}

enum ScopeState {
    Active {
        span: Span,
        enqueue: bool,
        record_exceptions: bool,
    },
    NoOp,
}

/// The owning handle over a [`Span`]. Not safe for concurrent
/// mutation — transferring a `Scope` across threads must happen-before any
/// further mutation.
pub struct Scope {
    factory: OperationScopeFactory,
    state: ScopeState,
    popped: bool,
}

/// An alias matching the synchronous, guard-style entry point generated by
/// `#[instrument]` for non-`async fn`s.
pub type LocalScope = Scope;

impl Scope {
    fn noop(factory: OperationScopeFactory) -> Self {
        Self {
            factory,
            state: ScopeState::NoOp,
            popped: true,
        }
    }

    /// Opens a span against the process-wide default factory installed by
    /// [`init`]. Falls back to a no-op scope if no factory has been
    /// installed, rather than panicking — misconfiguration degrades, it
    /// never fails the host.
    pub fn begin_with_local_parent(name: &str, kind: SpanKind) -> Scope {
        match global_factory() {
            Some(factory) => factory.begin(
                name,
                BeginOptions {
                    kind,
                    ..Default::default()
                },
            ),
            None => {
                trace!(name, "no global OperationScopeFactory installed, using no-op scope");
                let stats = Arc::new(Statistics::new());
                Scope::noop(OperationScopeFactory {
                    config: Arc::new(ConfigurationProvider::new()),
                    worker: BackgroundWorker::new_detached(stats.clone()),
                    sampler: Arc::new(AlwaysOnSampler),
                    dispatcher: Arc::new(NullDispatcher),
                    stats,
                })
            }
        }
    }

    /// Identical to [`Self::begin_with_local_parent`]; the name
    /// synchronous call sites (and the `#[instrument]` macro) use.
    pub fn enter(name: &str, kind: SpanKind) -> Scope {
        Self::begin_with_local_parent(name, kind)
    }

    pub fn context(&self) -> Option<SpanContext> {
        match &self.state {
            ScopeState::Active { span, .. } => Some(span.context()),
            ScopeState::NoOp => None,
        }
    }

    /// Appends or overwrites an attribute. An empty key is silently ignored
    /// — this is a hot-path operation and never fails the caller.
    pub fn with_tag(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        let key = key.into();
        if key.is_empty() {
            return self;
        }
        if let ScopeState::Active { span, .. } = &mut self.state {
            span.set_attribute(key, value.into());
        }
        self
    }

    pub fn record_event(&mut self, name: impl Into<String>, attributes: Vec<(String, AttributeValue)>) {
        if let ScopeState::Active { span, .. } = &mut self.state {
            span.push_event(name.into(), attributes);
        }
    }

    pub fn record_exception(&mut self, info: ExceptionInfo) {
        if let ScopeState::Active {
            span,
            record_exceptions,
            ..
        } = &mut self.state
        {
            if *record_exceptions {
                span.record_exception(info);
            } else {
                span.set_status_if_unset(Status::Error {
                    description: Some(info.message),
                });
            }
        }
    }

    /// Sets terminal status `Ok`. A no-op if `fail` was already called —
    /// first call wins.
    pub fn succeed(&mut self) {
        if let ScopeState::Active { span, .. } = &mut self.state {
            span.set_status_if_unset(Status::Ok);
        }
    }

    /// Sets terminal status `Error`. A no-op if a terminal status was
    /// already set.
    pub fn fail(&mut self, info: ExceptionInfo) {
        self.record_exception(info);
    }

    /// Opens a nested span whose parent is this one.
    pub fn create_child(&self, name: &str) -> Scope {
        self.factory.begin(name, BeginOptions::default())
    }

    /// Records `end_time`, freezes the span and hands it to the pipeline
    /// unless sampling dropped it. Idempotent; also invoked by `Drop`.
    pub fn close(&mut self) {
        if self.popped {
            return;
        }
        self.popped = true;
        let state = std::mem::replace(&mut self.state, ScopeState::NoOp);
        if let ScopeState::Active {
            mut span, enqueue, ..
        } = state
        {
            span.close();
            pop_open_frame();
            self.factory.stats.record_activity_completed();
            if enqueue {
                let item = SpanWorkItem {
                    span,
                    dispatcher: self.factory.dispatcher.clone(),
                };
                self.factory.worker.try_enqueue(Box::new(item));
            }
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close();
    }
}

struct NullDispatcher;
impl SpanDispatcher for NullDispatcher {
    fn dispatch(&self, _span: Span) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BackgroundWorkerConfig;
    use std::sync::Mutex;

    struct RecordingDispatcher {
        spans: Arc<Mutex<Vec<Span>>>,
    }
    impl SpanDispatcher for RecordingDispatcher {
        fn dispatch(&self, span: Span) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.spans.lock().unwrap().push(span);
            Ok(())
        }
    }

    fn test_factory(spans: Arc<Mutex<Vec<Span>>>) -> OperationScopeFactory {
        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(BackgroundWorkerConfig::default(), stats.clone());
        OperationScopeFactory::new(
            Arc::new(ConfigurationProvider::new()),
            worker,
            Arc::new(AlwaysOnSampler),
            Arc::new(RecordingDispatcher { spans }),
            stats,
        )
    }

    #[tokio::test]
    async fn root_span_allocates_a_new_trace_id() {
        let factory = test_factory(Arc::new(Mutex::new(Vec::new())));
        let scope = factory.begin("op", BeginOptions::default());
        assert!(scope.context().unwrap().trace_id.is_valid());
    }

    #[tokio::test]
    async fn child_shares_trace_id_with_parent() {
        let factory = test_factory(Arc::new(Mutex::new(Vec::new())));
        let parent = factory.begin("parent", BeginOptions::default());
        let child = parent.create_child("child");
        assert_eq!(
            parent.context().unwrap().trace_id,
            child.context().unwrap().trace_id
        );
    }

    #[tokio::test]
    async fn closing_enqueues_the_span() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let factory = test_factory(spans.clone());
        {
            let mut scope = factory.begin("op", BeginOptions::default());
            scope.succeed();
        }
        factory
            .worker
            .flush(std::time::Duration::from_secs(1), crate::pipeline::Cancel::new())
            .await;
        assert_eq!(spans.lock().unwrap().len(), 1);
        assert_eq!(spans.lock().unwrap()[0].status, Status::Ok);
    }

    #[tokio::test]
    async fn disabled_config_yields_a_noop_scope() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let factory = test_factory(spans.clone());
        factory
            .config
            .apply(
                crate::config::LayerTarget::Global,
                ConfigLayer {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut scope = factory.begin("op", BeginOptions::default());
        assert!(scope.context().is_none());
        scope.with_tag("k", "v");
        scope.succeed();
        drop(scope);
        factory
            .worker
            .flush(std::time::Duration::from_millis(50), crate::pipeline::Cancel::new())
            .await;
        assert!(spans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn succeed_after_fail_is_a_no_op() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let factory = test_factory(spans.clone());
        {
            let mut scope = factory.begin("op", BeginOptions::default());
            scope.fail(ExceptionInfo {
                exception_type: "Boom".to_string(),
                message: "bad".to_string(),
                stacktrace: None,
            });
            scope.succeed();
        }
        factory
            .worker
            .flush(std::time::Duration::from_secs(1), crate::pipeline::Cancel::new())
            .await;
        let recorded = spans.lock().unwrap();
        assert_eq!(
            recorded[0].status,
            Status::Error {
                description: Some("bad".to_string())
            }
        );
    }
}
