// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! An embedded, provider-agnostic telemetry core.
//!
//! `scopeline` gives a host application operation scopes, W3C-compatible
//! correlation and trace-context propagation, a supervised background
//! delivery pipeline, parameter capture with redaction, and process-lifetime
//! shutdown coordination — without prescribing a wire export format or an
//! async runtime beyond Tokio.
//!
//! ```
//! use scopeline::prelude::*;
//!
//! struct DropDispatcher;
//! impl SpanDispatcher for DropDispatcher {
//!     fn dispatch(&self, _span: Span) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let stats = std::sync::Arc::new(Statistics::new());
//! let worker = BackgroundWorker::spawn(Default::default(), stats.clone());
//! let factory = OperationScopeFactory::new(
//!     std::sync::Arc::new(ConfigurationProvider::new()),
//!     worker,
//!     std::sync::Arc::new(AlwaysOnSampler),
//!     std::sync::Arc::new(DropDispatcher),
//!     stats,
//! );
//! let _ = scopeline::scope::init(factory);
//!
//! let mut scope = Scope::begin_with_local_parent("handle_request", SpanKind::Server);
//! scope.with_tag("user.id", 42i64);
//! scope.succeed();
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod exceptions;
pub mod flow;
pub mod future;
pub mod id;
pub mod lifetime;
pub mod pipeline;
pub mod scope;
pub mod span;
pub mod stats;

#[doc(hidden)]
pub mod util;

pub use scope::{LocalScope, Scope};
pub use span::SpanKind;

#[cfg(feature = "capture-derive")]
pub use scopeline_macro::{instrument, Capturable};

/// The common set of imports most host applications need.
pub mod prelude {
    pub use crate::capture::{
        apply_redaction, capture_value, CaptureLevel, CaptureOptions, Capturable, CapturedValue,
        ParameterCapture, RedactionStrategy,
    };
    pub use crate::config::{ConfigLayer, ConfigurationProvider, LayerTarget, OperationConfiguration};
    pub use crate::context::{SpanContext, TraceContext, TraceContextCodec};
    pub use crate::correlation::CorrelationContext;
    pub use crate::exceptions::ExceptionAggregator;
    pub use crate::future::FutureExt;
    pub use crate::id::{SpanId, TraceId};
    pub use crate::lifetime::{LifetimeHook, LifetimeManager, ShutdownResult};
    pub use crate::pipeline::{BackgroundWorker, BackgroundWorkerConfig, WorkItem};
    pub use crate::scope::{
        AlwaysOnSampler, BeginOptions, OperationScopeFactory, ParentOverride, RatioSampler,
        Sampler, SamplingDecision, Scope, SpanDispatcher,
    };
    pub use crate::span::{AttributeValue, ExceptionInfo, Span, SpanKind, Status};
    pub use crate::stats::{Statistics, StatisticsSnapshot};

    #[cfg(feature = "capture-derive")]
    pub use scopeline_macro::{instrument, Capturable};
}
