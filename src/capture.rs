// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Depth- and size-bounded parameter capture with sensitive-field redaction.
//!
//! Rust has no runtime reflection, so the
//! "iterate public readable fields" step becomes a compile-time capture
//! descriptor: `#[derive(Capturable)]` (in `scopeline-macro`) generates an
//! `impl Capturable for T` that walks the struct's named fields the same
//! way the source's reflective walker does, minus the reflection. Every
//! concrete capturable type — primitives, `Vec`/`Option`/`HashMap`, and
//! every derived struct — implements the same `Capturable` trait directly,
//! so dispatch through the single generic [`capture_value`] entry point
//! never needs a blanket implementation (and the conflicts one would bring).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::util::pool::Pool;

/// How much of a captured value's structure to walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureLevel {
    None,
    Minimal,
    Standard,
    Verbose,
}

/// A redaction strategy applied to a sensitive field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedactionStrategy {
    Remove,
    Mask,
    Hash,
    Partial,
    TypeName,
}

/// The result of capturing one value: a primitive scalar, a truncated
/// string, a bounded list/map, an absent value, or a sentinel string
///.
#[derive(Clone, Debug, PartialEq)]
pub enum CapturedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<CapturedValue>),
    Map(Vec<(String, CapturedValue)>),
    Null,
    Sentinel(String),
}

type SerializerFn = Arc<dyn Fn(&dyn Any) -> CapturedValue + Send + Sync>;

/// Options controlling capture depth, breadth and redaction policy
///.
#[derive(Clone)]
pub struct CaptureOptions {
    pub level: CaptureLevel,
    pub auto_detect_sensitive: bool,
    pub default_redaction: RedactionStrategy,
    pub max_depth: usize,
    pub max_collection_items: usize,
    pub max_string_length: usize,
    pub use_custom_display: bool,
    pub capture_property_names: bool,
    custom_serializers: DashMap<TypeId, SerializerFn>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            level: CaptureLevel::Standard,
            auto_detect_sensitive: true,
            default_redaction: RedactionStrategy::Mask,
            max_depth: 5,
            max_collection_items: 50,
            max_string_length: 256,
            use_custom_display: true,
            capture_property_names: true,
            custom_serializers: DashMap::new(),
        }
    }
}

impl CaptureOptions {
    /// Registers a custom serializer for `T`, which takes precedence over
    /// structural capture for every value of that type.
    pub fn register_serializer<T, F>(&self, f: F)
    where
        T: Any + 'static,
        F: Fn(&T) -> CapturedValue + Send + Sync + 'static,
    {
        let boxed: SerializerFn = Arc::new(move |value: &dyn Any| {
            // Always succeeds: `capture_value` only invokes a serializer it
            // looked up by this exact `TypeId`.
            f(value.downcast_ref::<T>().expect("type id matched registration"))
        });
        self.custom_serializers.insert(TypeId::of::<T>(), boxed);
    }

    fn serializer_for(&self, type_id: TypeId) -> Option<SerializerFn> {
        self.custom_serializers.get(&type_id).map(|e| e.clone())
    }
}

/// A registered name-fragment → redaction-strategy mapping.
#[derive(Clone, Debug)]
pub struct SensitivePattern {
    pub fragment: String,
    pub strategy: RedactionStrategy,
}

/// The live set of sensitive-name patterns, swapped atomically so lookups
/// never block a concurrent registration.
pub struct SensitivePatternRegistry {
    patterns: ArcSwap<Vec<SensitivePattern>>,
}

impl SensitivePatternRegistry {
    fn new(defaults: Vec<SensitivePattern>) -> Self {
        Self {
            patterns: ArcSwap::from_pointee(defaults),
        }
    }

    /// Registers a pattern immediately visible to subsequent lookups.
    /// Matching is always case-insensitive substring.
    pub fn register(&self, fragment: impl Into<String>, strategy: RedactionStrategy) {
        let mut next = (**self.patterns.load()).clone();
        next.push(SensitivePattern {
            fragment: fragment.into().to_lowercase(),
            strategy,
        });
        self.patterns.store(Arc::new(next));
    }

    pub fn lookup(&self, name: &str) -> Option<RedactionStrategy> {
        let lower = name.to_lowercase();
        self.patterns
            .load()
            .iter()
            .find(|p| lower.contains(p.fragment.as_str()))
            .map(|p| p.strategy)
    }
}

static GLOBAL_PATTERNS: Lazy<SensitivePatternRegistry> = Lazy::new(|| {
    SensitivePatternRegistry::new(vec![
        SensitivePattern {
            fragment: "password".to_string(),
            strategy: RedactionStrategy::Mask,
        },
        SensitivePattern {
            fragment: "passwd".to_string(),
            strategy: RedactionStrategy::Mask,
        },
        SensitivePattern {
            fragment: "secret".to_string(),
            strategy: RedactionStrategy::Mask,
        },
        SensitivePattern {
            fragment: "token".to_string(),
            strategy: RedactionStrategy::Mask,
        },
        SensitivePattern {
            fragment: "apikey".to_string(),
            strategy: RedactionStrategy::Mask,
        },
        SensitivePattern {
            fragment: "email".to_string(),
            strategy: RedactionStrategy::Partial,
        },
        SensitivePattern {
            fragment: "ssn".to_string(),
            strategy: RedactionStrategy::Hash,
        },
        SensitivePattern {
            fragment: "creditcard".to_string(),
            strategy: RedactionStrategy::Hash,
        },
    ])
});

/// The process-wide sensitive-pattern registry consulted when
/// `auto_detect_sensitive` is enabled.
pub fn global_patterns() -> &'static SensitivePatternRegistry {
    &GLOBAL_PATTERNS
}

/// Implemented for every value [`capture_value`] can accept: builtin
/// primitives, the handful of generic containers this crate captures
/// structurally, and every `#[derive(Capturable)]` struct.
pub trait Capturable {
    fn capture(&self, opts: &CaptureOptions, depth: usize) -> CapturedValue;

    /// The representation redaction strategies operate on.
    fn display_form(&self) -> String;
}

/// Truncates `s` to `max_len` characters, appending the `"… (N chars)"`
/// sentinel appended once a string is truncated.
fn truncate_string(s: &str, max_len: usize) -> CapturedValue {
    let char_count = s.chars().count();
    if char_count <= max_len {
        CapturedValue::Str(s.to_string())
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        CapturedValue::Str(format!("{truncated}… ({char_count} chars)"))
    }
}

/// Depth check plus the `Minimal`-level short-circuit shared by every
/// collection/object `Capturable` impl.
fn collection_gate(opts: &CaptureOptions, depth: usize) -> Option<CapturedValue> {
    if depth > opts.max_depth {
        return Some(CapturedValue::Sentinel(format!(
            "[Max depth {} reached]",
            opts.max_depth
        )));
    }
    if opts.level == CaptureLevel::Minimal {
        return Some(CapturedValue::Null);
    }
    None
}

/// As [`collection_gate`], plus the `Standard`-level short-circuit to a
/// truncated display form — only objects (not collections) stop here,
/// since collections always iterate their bounded elements regardless of
/// `Standard` vs `Verbose`.
fn object_gate(opts: &CaptureOptions, depth: usize, display_form: impl FnOnce() -> String) -> Option<CapturedValue> {
    if let Some(gated) = collection_gate(opts, depth) {
        return Some(gated);
    }
    if opts.level == CaptureLevel::Standard {
        return Some(truncate_string(&display_form(), opts.max_string_length));
    }
    None
}

macro_rules! impl_capturable_primitive {
    ($ty:ty, $variant:ident) => {
        impl Capturable for $ty {
            fn capture(&self, _opts: &CaptureOptions, _depth: usize) -> CapturedValue {
                CapturedValue::$variant((*self).into())
            }
            fn display_form(&self) -> String {
                self.to_string()
            }
        }
    };
}

impl_capturable_primitive!(bool, Bool);
impl_capturable_primitive!(i8, Int);
impl_capturable_primitive!(i16, Int);
impl_capturable_primitive!(i32, Int);
impl_capturable_primitive!(i64, Int);
impl_capturable_primitive!(u8, Int);
impl_capturable_primitive!(u16, Int);
impl_capturable_primitive!(u32, Int);
impl_capturable_primitive!(f32, Float);
impl_capturable_primitive!(f64, Float);

impl Capturable for u64 {
    fn capture(&self, _opts: &CaptureOptions, _depth: usize) -> CapturedValue {
        CapturedValue::Int(*self as i64)
    }
    fn display_form(&self) -> String {
        self.to_string()
    }
}

impl Capturable for String {
    fn capture(&self, opts: &CaptureOptions, _depth: usize) -> CapturedValue {
        truncate_string(self, opts.max_string_length)
    }
    fn display_form(&self) -> String {
        self.clone()
    }
}

impl Capturable for std::time::Duration {
    fn capture(&self, _opts: &CaptureOptions, _depth: usize) -> CapturedValue {
        CapturedValue::Str(format!("{self:?}"))
    }
    fn display_form(&self) -> String {
        format!("{self:?}")
    }
}

impl<T: Capturable> Capturable for Option<T> {
    fn capture(&self, opts: &CaptureOptions, depth: usize) -> CapturedValue {
        match self {
            Some(v) => v.capture(opts, depth),
            None => CapturedValue::Null,
        }
    }
    fn display_form(&self) -> String {
        match self {
            Some(v) => v.display_form(),
            None => "null".to_string(),
        }
    }
}

impl<T: Capturable> Capturable for Vec<T> {
    fn capture(&self, opts: &CaptureOptions, depth: usize) -> CapturedValue {
        if let Some(gated) = collection_gate(opts, depth) {
            return gated;
        }
        let mut items = Vec::new();
        for value in self.iter().take(opts.max_collection_items) {
            items.push(value.capture(opts, depth + 1));
        }
        if self.len() > opts.max_collection_items {
            items.push(CapturedValue::Sentinel(format!(
                "... (total: {} items)",
                self.len()
            )));
        }
        CapturedValue::List(items)
    }
    fn display_form(&self) -> String {
        format!("[{} items]", self.len())
    }
}

impl<V: Capturable> Capturable for HashMap<String, V> {
    fn capture(&self, opts: &CaptureOptions, depth: usize) -> CapturedValue {
        if let Some(gated) = collection_gate(opts, depth) {
            return gated;
        }
        let mut out = Vec::new();
        for (key, value) in self.iter().take(opts.max_collection_items) {
            out.push((key.clone(), value.capture(opts, depth + 1)));
        }
        if self.len() > opts.max_collection_items {
            out.push((
                "...".to_string(),
                CapturedValue::Sentinel(format!("(total: {} items)", self.len())),
            ));
        }
        CapturedValue::Map(out)
    }
    fn display_form(&self) -> String {
        format!("{{{} entries}}", self.len())
    }
}

/// One scratch buffer per struct capture call, recycled through a free list
/// the same way `minitrace::util::object_pool` recycles its collector
/// buffers — every `Verbose`-level struct capture allocates and immediately
/// discards a `Vec<(&str, CapturedValue)>` otherwise.
static FIELD_BUFFERS: Lazy<Pool<Vec<(&'static str, CapturedValue)>>> =
    Lazy::new(|| Pool::new(Vec::new, Vec::clear));

/// Helper the `#[derive(Capturable)]` macro's generated `capture` method
/// calls for a struct's unmarked fields: object-level gating
/// (depth/Minimal/Standard) followed by the generated field walk on
/// `Verbose`, using a pooled scratch buffer for the intermediate
/// `(name, value)` pairs.
pub fn object_capture(
    opts: &CaptureOptions,
    depth: usize,
    type_name: &str,
    build_fields: impl FnOnce(&mut Vec<(&'static str, CapturedValue)>),
) -> CapturedValue {
    if let Some(gated) = object_gate(opts, depth, || type_name.to_string()) {
        return gated;
    }
    let mut buffer = FIELD_BUFFERS.pull();
    build_fields(&mut buffer);
    CapturedValue::Map(buffer.drain(..).map(|(k, v)| (k.to_string(), v)).collect())
}

/// The single generic entry point every `#[derive(Capturable)]` field
/// capture call goes through. A registered custom serializer for `T`
/// always wins over structural capture.
pub fn capture_value<T: Capturable + Any>(value: &T, opts: &CaptureOptions, depth: usize) -> CapturedValue {
    if let Some(serializer) = opts.serializer_for(TypeId::of::<T>()) {
        return serializer(value as &dyn Any);
    }
    value.capture(opts, depth)
}

/// As [`capture_value`], but first checks the sensitive-pattern registry by
/// `name` when `auto_detect_sensitive` is enabled.
/// Explicit `#[capture(sensitive)]` annotations bypass this entirely and
/// call [`apply_redaction`] directly from the generated code.
pub fn capture_named_value<T: Capturable + Any>(
    name: &str,
    value: &T,
    opts: &CaptureOptions,
    depth: usize,
) -> CapturedValue {
    if opts.auto_detect_sensitive {
        if let Some(strategy) = global_patterns().lookup(name) {
            return apply_redaction(strategy, value);
        }
    }
    capture_value(value, opts, depth)
}

/// Applies a redaction strategy to `value`'s display form.
pub fn apply_redaction<T: Capturable>(strategy: RedactionStrategy, value: &T) -> CapturedValue {
    match strategy {
        RedactionStrategy::Remove => CapturedValue::Null,
        RedactionStrategy::Mask => CapturedValue::Str("***".to_string()),
        RedactionStrategy::Hash => {
            let digest = Sha256::digest(value.display_form().as_bytes());
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            CapturedValue::Str(hex.chars().take(8).collect())
        }
        RedactionStrategy::Partial => {
            let display = value.display_form();
            if display.chars().count() <= 4 {
                CapturedValue::Str("***".to_string())
            } else {
                let chars: Vec<char> = display.chars().collect();
                let first: String = chars[..2].iter().collect();
                let last: String = chars[chars.len() - 2..].iter().collect();
                CapturedValue::Str(format!("{first}***{last}"))
            }
        }
        RedactionStrategy::TypeName => {
            CapturedValue::Str(std::any::type_name::<T>().rsplit("::").next().unwrap_or("").to_string())
        }
    }
}

/// Captures a single named parameter. Callers —
/// typically `#[instrument]`-generated wrappers — invoke this once per
/// argument and collect the results into the call site's parameter map.
pub struct ParameterCapture;

impl ParameterCapture {
    pub fn capture_one<T: Capturable + Any>(
        name: &str,
        value: &T,
        opts: &CaptureOptions,
    ) -> (String, CapturedValue) {
        if opts.level == CaptureLevel::None {
            return (name.to_string(), CapturedValue::Null);
        }
        (name.to_string(), capture_named_value(name, value, opts, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_field_capture_matches_documented_scenario() {
        let opts = CaptureOptions::default();
        let (_, user_id) = ParameterCapture::capture_one("userId", &42i64, &opts);
        assert_eq!(user_id, CapturedValue::Int(42));

        let (_, password) =
            ParameterCapture::capture_one("password", &"hunter2".to_string(), &opts);
        assert_eq!(password, CapturedValue::Str("***".to_string()));

        let (_, email) = ParameterCapture::capture_one(
            "email",
            &"alice@example.com".to_string(),
            &opts,
        );
        assert_eq!(email, CapturedValue::Str("al***om".to_string()));
    }

    #[test]
    fn mask_strategy_is_always_three_stars() {
        let cases: &[&str] = &["", "a", "hunter2", "a very long secret value indeed"];
        for value in cases {
            assert_eq!(
                apply_redaction(RedactionStrategy::Mask, &value.to_string()),
                CapturedValue::Str("***".to_string())
            );
        }
    }

    #[test]
    fn hash_strategy_is_deterministic() {
        let a = apply_redaction(RedactionStrategy::Hash, &"value".to_string());
        let b = apply_redaction(RedactionStrategy::Hash, &"value".to_string());
        assert_eq!(a, b);
        if let CapturedValue::Str(hex) = a {
            assert_eq!(hex.len(), 8);
        } else {
            panic!("expected Str");
        }
    }

    #[test]
    fn strings_are_truncated_with_char_count_sentinel() {
        let opts = CaptureOptions {
            max_string_length: 4,
            ..CaptureOptions::default()
        };
        let value = capture_value(&"abcdefgh".to_string(), &opts, 0);
        assert_eq!(value, CapturedValue::Str("abcd… (8 chars)".to_string()));
    }

    #[test]
    fn collections_are_truncated_with_total_sentinel() {
        let opts = CaptureOptions {
            max_collection_items: 2,
            ..CaptureOptions::default()
        };
        let value = capture_value(&vec![1i64, 2, 3, 4], &opts, 0);
        match value {
            CapturedValue::List(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[2], CapturedValue::Sentinel("... (total: 4 items)".to_string()));
            }
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn depth_limit_emits_sentinel() {
        let opts = CaptureOptions {
            max_depth: 0,
            ..CaptureOptions::default()
        };
        let value = capture_value(&vec![1i64], &opts, 1);
        assert_eq!(value, CapturedValue::Sentinel("[Max depth 0 reached]".to_string()));
    }

    #[test]
    fn minimal_level_suppresses_non_primitives() {
        let opts = CaptureOptions {
            level: CaptureLevel::Minimal,
            ..CaptureOptions::default()
        };
        let value = capture_value(&vec![1i64, 2], &opts, 0);
        assert_eq!(value, CapturedValue::Null);
    }

    #[test]
    fn custom_serializer_takes_precedence() {
        let opts = CaptureOptions::default();
        opts.register_serializer::<i64, _>(|_v: &i64| CapturedValue::Str("custom".to_string()));
        let value = capture_value(&7i64, &opts, 0);
        assert_eq!(value, CapturedValue::Str("custom".to_string()));
    }

    #[test]
    fn pattern_matching_is_case_insensitive_and_substring_based() {
        global_patterns().register("testfragmentxyz", RedactionStrategy::Mask);
        assert_eq!(
            global_patterns().lookup("userTestFragmentXYZValue"),
            Some(RedactionStrategy::Mask)
        );
        assert_eq!(global_patterns().lookup("unrelated"), None);
    }
}
