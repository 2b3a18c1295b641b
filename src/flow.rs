// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Identifies "the current async-flow" so [`crate::correlation::CorrelationContext`]
//! and the open-span stack in [`crate::scope`] can both key their ambient
//! state the same way.
//!
//! `minitrace`'s `LOCAL_SPAN_STACK` keys off the OS thread alone, which is
//! correct for its model (a span is entered and exited without crossing an
//! `.await`). This crate's ambient state must also survive a Tokio task being
//! polled from a different worker thread between suspensions, so when a
//! Tokio task context is present its stable [`tokio::task::Id`] is used
//! instead of the thread id.

/// The key under which ambient per-flow state is stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FlowKey {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

/// Resolves the key for whichever flow is executing right now.
#[inline]
pub fn current_flow_key() -> FlowKey {
    match tokio::task::try_id() {
        Some(id) => FlowKey::Task(id),
        None => FlowKey::Thread(std::thread::current().id()),
    }
}
