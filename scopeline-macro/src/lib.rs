// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Procedural macros backing `scopeline`'s compile-time instrumentation.
//!
//! The source system this crate rewrites auto-instruments interfaces through
//! runtime reflection and dynamically generated proxies. Rust has neither, so
//! both macros here do at compile time what that runtime step did on every
//! call: [`instrument`] wraps a function body in a scope, and
//! `#[derive(Capturable)]` emits a capture descriptor for a struct's public
//! fields instead of walking them through reflection.

extern crate proc_macro;

mod capturable;
mod instrument;

use proc_macro::TokenStream;

/// Wraps a function (sync or `async fn`) in an operation scope.
///
/// ```ignore
/// #[scopeline_macro::instrument]
/// fn foo() { /* ... */ }
///
/// #[scopeline_macro::instrument("checkout", kind = "client")]
/// async fn bar() { /* ... */ }
/// ```
///
/// For a synchronous function this expands to opening a
/// [`LocalScope`](scopeline) around the body. For an `async fn` it expands to
/// binding the produced future to the scope so the scope's lifetime tracks
/// the future's, not the calling stack frame's — the same asymmetry
/// minitrace's `#[trace]` macro encodes between `LocalSpan` and `Span::in_span`.
#[proc_macro_attribute]
pub fn instrument(args: TokenStream, item: TokenStream) -> TokenStream {
    instrument::expand(args, item)
}

/// Derives a [`Capturable`](scopeline) descriptor: a list of `(field name,
/// extractor)` pairs resolved at compile time, used by parameter capture's
/// `Verbose` level in place of reflection-based property traversal.
///
/// Fields annotated `#[capture(skip)]` are omitted entirely; fields annotated
/// `#[capture(sensitive)]` or `#[capture(sensitive = "mask")]` are replaced by
/// the named redaction strategy (default `mask`) without ever calling their
/// `Debug`/`Display` implementation.
#[proc_macro_derive(Capturable, attributes(capture))]
pub fn derive_capturable(item: TokenStream) -> TokenStream {
    capturable::expand(item)
}
