// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta, NestedMeta};

struct FieldPlan {
    ident: syn::Ident,
    action: Action,
}

enum Action {
    Capture,
    Skip,
    Sensitive(String),
}

pub(crate) fn expand(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = input.ident.clone();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "Capturable can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "Capturable can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let plans: Vec<FieldPlan> = fields
        .iter()
        .map(|f| FieldPlan {
            ident: f.ident.clone().expect("named field"),
            action: parse_action(&f.attrs),
        })
        .collect();

    let entries: Vec<TokenStream2> = plans
        .iter()
        .filter_map(|plan| {
            let ident = &plan.ident;
            let name_str = ident.to_string();
            match &plan.action {
                Action::Skip => None,
                Action::Capture => Some(quote! {
                    out.push((
                        #name_str,
                        ::scopeline::capture::capture_named_value(#name_str, &self.#ident, opts, depth + 1),
                    ));
                }),
                Action::Sensitive(strategy) => {
                    let strategy_ident =
                        syn::Ident::new(&to_pascal(strategy), proc_macro2::Span::call_site());
                    Some(quote! {
                        out.push((
                            #name_str,
                            ::scopeline::capture::apply_redaction(
                                ::scopeline::capture::RedactionStrategy::#strategy_ident,
                                &self.#ident,
                            ),
                        ));
                    })
                }
            }
        })
        .collect();

    let type_name_str = name.to_string();
    let expanded = quote! {
        impl ::scopeline::capture::Capturable for #name {
            fn capture(
                &self,
                opts: &::scopeline::capture::CaptureOptions,
                depth: usize,
            ) -> ::scopeline::capture::CapturedValue {
                ::scopeline::capture::object_capture(opts, depth, #type_name_str, |out| {
                    #(#entries)*
                })
            }

            fn display_form(&self) -> String {
                #type_name_str.to_string()
            }
        }
    };

    expanded.into()
}

fn parse_action(attrs: &[syn::Attribute]) -> Action {
    for attr in attrs {
        if !attr.path.is_ident("capture") {
            continue;
        }
        let meta = match attr.parse_meta() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if let Meta::List(list) = meta {
            for nested in list.nested.iter() {
                match nested {
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("skip") => {
                        return Action::Skip;
                    }
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("sensitive") => {
                        return Action::Sensitive("mask".to_string());
                    }
                    NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("sensitive") => {
                        if let Lit::Str(s) = &nv.lit {
                            return Action::Sensitive(s.value());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Action::Capture
}

fn to_pascal(s: &str) -> String {
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
