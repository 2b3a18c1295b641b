// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Tools for tracing a [`std::future::Future`].
//!
//! [`FutureExt::in_scope`] binds a [`Scope`] to a future so it stays the
//! current open-span-stack parent across every poll, surviving suspension
//! and (per [`crate::flow`]) resumption on a different worker thread. It is
//! crucial that the outermost future of a spawned task uses `in_scope`,
//! otherwise nested `#[instrument]` calls inside it will not find a parent.
//! Mirrors `minitrace::future::FutureExt::in_span`/`InSpan` one-for-one,
//! generalized from a thread-local span stack to the flow-keyed one.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::scope::Scope;

impl<T: std::future::Future> FutureExt for T {}

/// An extension trait for every [`std::future::Future`] that binds a
/// [`Scope`] for the duration of the poll loop.
pub trait FutureExt: std::future::Future + Sized {
    /// Binds `scope` to this future: the scope stays open until the future
    /// resolves or is dropped, at which point it closes exactly as a local
    /// `Scope` dropped at the end of a block would.
    #[inline]
    fn in_scope(self, scope: Scope) -> InScope<Self> {
        InScope {
            inner: self,
            scope: Some(scope),
        }
    }
}

/// Adapter for [`FutureExt::in_scope`].
#[pin_project::pin_project]
pub struct InScope<T> {
    #[pin]
    inner: T,
    scope: Option<Scope>,
}

impl<T: std::future::Future> std::future::Future for InScope<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let res = this.inner.poll(cx);
        match res {
            r @ Poll::Pending => r,
            other => {
                // Dropping here (rather than at struct-drop time) closes the
                // span as soon as the future resolves, not whenever the
                // `InScope` wrapper itself happens to be dropped.
                this.scope.take();
                other
            }
        }
    }
}
