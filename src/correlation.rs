// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Ambient correlation identifier with scoped push/pop.
//!
//! Grounded on `minitrace::local::local_span_stack`'s thread-local
//! `Rc<RefCell<LocalSpanStack>>` pattern, generalized with [`crate::flow`] so
//! the ambient value also survives a Tokio task moving between worker
//! threads across an `.await` — something a plain `thread_local!` cannot do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::flow::{current_flow_key, FlowKey};
use crate::id::TraceId;

static FALLBACK_TO_TRACE_ID: AtomicBool = AtomicBool::new(true);

#[derive(Default)]
struct FlowState {
    explicit: Vec<String>,
    generated: Option<String>,
}

static FLOWS: Lazy<DashMap<FlowKey, FlowState>> = Lazy::new(DashMap::new);

/// `tokio::task::Id`s are process-unique and never reused, so a flow that
/// only ever calls [`CorrelationContext::current`] (never `begin_scope`) has
/// no lexical scope or guard to clean its entry up when the task ends —
/// unlike a plain `thread_local!`, which frees itself on thread exit.
/// `GENERATED_ORDER` tracks insertion order and, mirroring the pipeline's own
/// bounded drop-oldest queue, evicts the oldest generated-only entry once the
/// tracked set exceeds `MAX_GENERATED_FLOWS` — trading perfect per-flow
/// stability under extreme flow churn for a hard cap on memory.
const MAX_GENERATED_FLOWS: usize = 4096;

static GENERATED_ORDER: Lazy<Mutex<VecDeque<FlowKey>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(MAX_GENERATED_FLOWS)));

/// The ambient, async-flow-safe correlation identifier.
///
/// All methods are associated functions: there is exactly one ambient
/// identifier per flow, not an instance a caller constructs.
pub struct CorrelationContext;

impl CorrelationContext {
    /// Enables or disables falling back to the current span's trace id when
    /// no explicit value has been pushed. Enabled by default.
    pub fn set_trace_id_fallback(enabled: bool) {
        FALLBACK_TO_TRACE_ID.store(enabled, Ordering::Relaxed);
    }

    /// Returns, in order: (1) the most recently pushed explicit value; (2)
    /// if fallback is enabled, the current span's trace id as 32 lowercase
    /// hex digits; (3) a freshly generated id, cached for the remainder of
    /// this flow.
    pub fn current() -> String {
        let key = current_flow_key();

        if let Some(state) = FLOWS.get(&key) {
            if let Some(top) = state.explicit.last() {
                return top.clone();
            }
        }

        if FALLBACK_TO_TRACE_ID.load(Ordering::Relaxed) {
            if let Some(ctx) = crate::scope::current_span_context() {
                if ctx.trace_id.is_valid() {
                    return ctx.trace_id.to_string();
                }
            }
        }

        let mut entry = FLOWS.entry(key).or_default();
        if let Some(generated) = &entry.generated {
            return generated.clone();
        }
        let generated = TraceId::random().to_string();
        entry.generated = Some(generated.clone());
        drop(entry);

        let mut order = GENERATED_ORDER.lock();
        order.push_back(key);
        if order.len() > MAX_GENERATED_FLOWS {
            if let Some(oldest) = order.pop_front() {
                FLOWS.remove_if(&oldest, |_, state| state.explicit.is_empty());
            }
        }
        drop(order);

        generated
    }

    /// The number of flows currently tracked, including both explicit and
    /// generated-only state. Test-only introspection for the bounded-eviction
    /// guarantee above.
    #[cfg(test)]
    pub(crate) fn tracked_flow_count() -> usize {
        FLOWS.len()
    }

    /// Returns only the explicit value (step 1 of [`Self::current`]), or
    /// `None` if nothing has been pushed for this flow. Log enrichers use
    /// this to distinguish "the caller set this id" from "we derived one."
    pub fn raw() -> Option<String> {
        FLOWS
            .get(&current_flow_key())
            .and_then(|state| state.explicit.last().cloned())
    }

    /// Pushes `value` as the explicit correlation id for the current flow.
    /// Dropping the returned guard restores whatever was current before.
    /// Nesting is strictly LIFO.
    #[must_use = "dropping the guard immediately pops the pushed value"]
    pub fn begin_scope(value: impl Into<String>) -> ScopedGuard {
        let key = current_flow_key();
        FLOWS.entry(key).or_default().explicit.push(value.into());
        ScopedGuard { key }
    }

    /// Removes any explicit value pushed for the current flow, leaving
    /// future calls to [`Self::current`] to fall through to trace-id
    /// fallback or generation. The cached generated id, if any, is
    /// untouched, since it does not represent caller-pushed state.
    pub fn clear() {
        if let Some(mut state) = FLOWS.get_mut(&current_flow_key()) {
            state.explicit.clear();
        }
    }
}

/// Restores the previous explicit correlation value on drop.
pub struct ScopedGuard {
    key: FlowKey,
}

impl Drop for ScopedGuard {
    fn drop(&mut self) {
        if let Some(mut state) = FLOWS.get_mut(&self.key) {
            state.explicit.pop();
            if state.explicit.is_empty() && state.generated.is_none() {
                drop(state);
                FLOWS.remove(&self.key);
            }
        }
    }
}
