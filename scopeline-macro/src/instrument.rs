// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

use darling::FromMeta;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, ItemFn};

#[derive(Debug, FromMeta)]
struct Args {
    #[darling(default)]
    name: Option<String>,
    #[darling(default = "default_kind")]
    kind: String,
}

fn default_kind() -> String {
    "internal".to_string()
}

pub(crate) fn expand(args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let attr_args = parse_macro_input!(args as AttributeArgs);

    let args = match Args::from_list(&attr_args) {
        Ok(v) => v,
        Err(e) => return TokenStream::from(e.write_errors()),
    };

    let default_name = input.sig.ident.to_string();
    let name = args.name.unwrap_or(default_name);
    let kind = syn::Ident::new(&to_pascal_case(&args.kind), proc_macro2::Span::call_site());

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    let is_async = sig.asyncness.is_some();
    let body: TokenStream2 = if is_async {
        quote! {
            {
                let __scopeline_span = ::scopeline::Scope::begin_with_local_parent(
                    #name,
                    ::scopeline::SpanKind::#kind,
                );
                ::scopeline::future::FutureExt::in_scope(
                    async move #block,
                    __scopeline_span,
                ).await
            }
        }
    } else {
        quote! {
            {
                let mut __scopeline_guard = ::scopeline::LocalScope::enter(
                    #name,
                    ::scopeline::SpanKind::#kind,
                );
                // `#block` is inlined rather than wrapped in a closure so an
                // explicit `return` inside it still targets this function;
                // the guard closes on the normal unwind path either way.
                let __scopeline_result = #block;
                __scopeline_guard.succeed();
                __scopeline_result
            }
        }
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #body
        }
    };

    output.into()
}

fn to_pascal_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut cap_next = true;
    for c in s.chars() {
        if c == '_' || c == '-' {
            cap_next = true;
            continue;
        }
        if cap_next {
            out.extend(c.to_uppercase());
            cap_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
