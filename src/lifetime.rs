// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Best-effort process-shutdown coordination.
//!
//! Grounded on [`crate::pipeline::BackgroundWorker`]'s own atomic
//! `disposed`/phase flags for "safe to construct early, idempotent on
//! double-disposal" semantics. A single host-agnostic [`LifetimeHook`] trait
//! stands in for runtime-specific hosting hooks, with adapters supplied
//! separately rather than baked into the core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::pipeline::{BackgroundWorker, Cancel};
use crate::span::{ExceptionInfo, Status};
use crate::util::time::{duration_ns, new_anchor, MonotonicInstant};

/// The outcome of a shutdown attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownResult {
    pub success: bool,
    pub items_flushed: u64,
    pub items_remaining: u64,
    pub duration: Duration,
    pub reason: Option<String>,
}

impl ShutdownResult {
    fn already_in_progress() -> Self {
        Self {
            success: false,
            items_flushed: 0,
            items_remaining: 0,
            duration: Duration::ZERO,
            reason: Some("already_in_progress".to_string()),
        }
    }
}

/// A host-specific signal `LifetimeManager` should react to by shutting
/// down. The core never depends on a specific hosting runtime; adapters for
/// concrete hosts implement this trait and call [`LifetimeManager::shutdown`]
/// from whatever callback their host exposes.
pub trait LifetimeHook: Send + Sync {
    fn name(&self) -> &str;
}

/// A span identity still open on some flow's stack at the moment shutdown
/// begins. Callers supply these (typically by walking
/// [`crate::scope`]'s ambient open-frame stack for the calling flow) since
/// `lifetime` does not own span storage.
pub struct OpenSpanHandle<'a> {
    pub close: Box<dyn FnOnce(Status) + 'a>,
}

/// Coordinates a single best-effort shutdown sequence: stop accepting new
/// work, close whatever spans are still open with a terminating status, and
/// drain the pipeline within a bounded timeout.
pub struct LifetimeManager {
    worker: BackgroundWorker,
    is_shutting_down: AtomicBool,
}

impl LifetimeManager {
    /// Always succeeds — safe to call before the host is ready.
    pub fn new(worker: BackgroundWorker) -> Self {
        Self {
            worker,
            is_shutting_down: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// Runs the shutdown sequence: close any open spans, drain the pipeline
    /// within `timeout`, then mark shutdown complete. `open_spans` are closed
    /// with `Status::Error("process terminating")`
    /// before the pipeline is asked to drain, so their `close` work items
    /// (if any) have a chance to be flushed too.
    pub async fn shutdown(&self, timeout: Duration, open_spans: Vec<OpenSpanHandle<'_>>) -> ShutdownResult {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ShutdownResult::already_in_progress();
        }

        let start = MonotonicInstant::now();
        let terminating_status = Status::Error {
            description: Some("process terminating".to_string()),
        };
        for handle in open_spans {
            (handle.close)(terminating_status.clone());
        }

        let cancel = Cancel::new();
        let flush = self.worker.flush(timeout, cancel).await;
        let anchor = new_anchor();
        let elapsed_ns = duration_ns(start, MonotonicInstant::now(), &anchor);

        ShutdownResult {
            success: flush.success,
            items_flushed: flush.items_flushed,
            items_remaining: flush.items_remaining,
            duration: Duration::from_nanos(elapsed_ns),
            reason: if flush.success {
                None
            } else {
                Some("timed out before the queue drained".to_string())
            },
        }
    }
}

/// Records that the triggering exception was never thrown, so
/// `record_exception` downstream must not synthesize a stacktrace
///. Used by [`on_panic_hook`] when the panic payload carries no
/// captured backtrace.
fn exception_from_panic(payload: &(dyn std::any::Any + Send)) -> ExceptionInfo {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    ExceptionInfo {
        exception_type: "panic".to_string(),
        message,
        stacktrace: None,
    }
}

/// Adapter for `std::panic::set_hook`: converts a panic payload into an
/// [`ExceptionInfo`] and hands it to `on_exception`, then forwards to
/// `previous` so existing host panic reporting still runs.
pub fn on_panic_hook(
    previous: Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Sync + Send + 'static>,
    on_exception: impl Fn(ExceptionInfo) + Sync + Send + 'static,
) -> impl Fn(&std::panic::PanicHookInfo<'_>) + Sync + Send + 'static {
    move |info: &std::panic::PanicHookInfo<'_>| {
        on_exception(exception_from_panic(info.payload()));
        previous(info);
    }
}

/// Adapter for a host's ctrl-c / SIGINT signal: hosts wire their own signal
/// crate to call this closure, which in turn triggers `on_signal` (expected
/// to call [`LifetimeManager::shutdown`] and then exit).
pub fn on_ctrlc(on_signal: impl FnOnce() + Send + 'static) -> impl FnOnce() + Send + 'static {
    on_signal
}

/// Adapter invoked by a host's own unhandled-exception notification API
///. Purely a naming seam:
/// hosts call this directly from whatever global handler they already have.
pub fn notify_exit(on_exit: impl FnOnce() + Send + 'static) -> impl FnOnce() + Send + 'static {
    on_exit
}
