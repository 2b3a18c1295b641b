// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Layered effective-configuration resolution.
//!
//! Grounded on `arc-swap`'s use in the `kata-containers` logging crate for
//! hot-swappable shared state: the layer stack itself lives behind an
//! `arc_swap::ArcSwap`, so `apply` is a single atomic pointer swap. The
//! per-`(type, method)` resolution cache is a `dashmap::DashMap`, a
//! concurrent map well suited to read-heavy/write-rare lookups like this one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterCaptureLevel {
    None,
    NamesOnly,
    NamesAndValues,
    Full,
}

/// Fully resolved behavior for a call site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationConfiguration {
    pub sampling_rate: f64,
    pub enabled: bool,
    pub parameter_capture: ParameterCaptureLevel,
    pub record_exceptions: bool,
    pub timeout_threshold_ms: u64,
    pub tags: HashMap<String, String>,
}

impl Default for OperationConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            enabled: true,
            parameter_capture: ParameterCaptureLevel::NamesOnly,
            record_exceptions: true,
            timeout_threshold_ms: 30_000,
            tags: HashMap::new(),
        }
    }
}

/// One partial contribution to the effective configuration at a specific
/// precedence level — every field is optional, so a layer only overrides
/// what it explicitly sets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigLayer {
    pub sampling_rate: Option<f64>,
    pub enabled: Option<bool>,
    pub parameter_capture: Option<ParameterCaptureLevel>,
    pub record_exceptions: Option<bool>,
    pub timeout_threshold_ms: Option<u64>,
    pub tags: HashMap<String, String>,
}

impl ConfigLayer {
    fn merge_into(&self, base: &mut OperationConfiguration) {
        if let Some(v) = self.sampling_rate {
            base.sampling_rate = v;
        }
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.parameter_capture {
            base.parameter_capture = v;
        }
        if let Some(v) = self.record_exceptions {
            base.record_exceptions = v;
        }
        if let Some(v) = self.timeout_threshold_ms {
            base.timeout_threshold_ms = v;
        }
        for (k, v) in &self.tags {
            base.tags.insert(k.clone(), v.clone());
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rate) = self.sampling_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidSamplingRate(rate));
            }
        }
        Ok(())
    }
}

/// Where a committed [`ConfigLayer`] applies, in ascending precedence:
/// global → namespace → type → method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LayerTarget {
    Global,
    Namespace(String),
    Type(String),
    Method(String, String),
}

#[derive(Clone, Default)]
struct ConfigLayers {
    global: ConfigLayer,
    namespaces: Vec<(String, ConfigLayer)>,
    types: HashMap<String, ConfigLayer>,
    methods: HashMap<(String, String), ConfigLayer>,
}

/// Concurrent-read, infrequent-write resolver for effective per-call-site
/// configuration.
pub struct ConfigurationProvider {
    layers: ArcSwap<ConfigLayers>,
    cache: DashMap<(String, String), OperationConfiguration>,
}

impl Default for ConfigurationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationProvider {
    pub fn new() -> Self {
        Self {
            layers: ArcSwap::from_pointee(ConfigLayers::default()),
            cache: DashMap::new(),
        }
    }

    /// Commits a layer at `target`. Validation happens before the swap, so a
    /// rejected commit leaves the previous configuration fully in effect,
    /// and the commit itself is atomic from a reader's perspective.
    pub fn apply(&self, target: LayerTarget, layer: ConfigLayer) -> Result<(), ConfigError> {
        layer.validate()?;
        if let LayerTarget::Namespace(pattern) = &target {
            validate_pattern(pattern)?;
        }

        let mut next = (**self.layers.load()).clone();
        match target {
            LayerTarget::Global => next.global = layer,
            LayerTarget::Namespace(pattern) => {
                next.namespaces.retain(|(p, _)| p != &pattern);
                next.namespaces.push((pattern, layer));
            }
            LayerTarget::Type(name) => {
                next.types.insert(name, layer);
            }
            LayerTarget::Method(type_name, method_name) => {
                next.methods.insert((type_name, method_name), layer);
            }
        }
        self.layers.store(Arc::new(next));
        self.cache.clear();
        Ok(())
    }

    /// Resolves the cached, committed layers for `(type_name, method_name)`.
    /// Per-call overrides are applied afterward, outside the cache, by
    /// [`Self::resolve_with_overrides`].
    pub fn resolve(&self, type_name: &str, method_name: &str) -> OperationConfiguration {
        let key = (type_name.to_string(), method_name.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let layers = self.layers.load();
        let mut config = OperationConfiguration::default();
        layers.global.merge_into(&mut config);

        let best_namespace = layers
            .namespaces
            .iter()
            .filter_map(|(pattern, layer)| {
                namespace_specificity(pattern, type_name).map(|score| (score, layer))
            })
            .max_by_key(|(score, _)| *score);
        if let Some((_, layer)) = best_namespace {
            layer.merge_into(&mut config);
        }

        if let Some(layer) = layers.types.get(type_name) {
            layer.merge_into(&mut config);
        }
        if let Some(layer) = layers.methods.get(&key) {
            layer.merge_into(&mut config);
        }

        self.cache.insert(key, config.clone());
        config
    }

    /// Applies a per-call override on top of the cached resolution. Never
    /// itself cached, since per-call overrides are supplied fresh at every
    /// `begin`.
    pub fn resolve_with_overrides(
        &self,
        type_name: &str,
        method_name: &str,
        overrides: Option<&ConfigLayer>,
    ) -> OperationConfiguration {
        let mut config = self.resolve(type_name, method_name);
        if let Some(overrides) = overrides {
            overrides.merge_into(&mut config);
        }
        config
    }
}

fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    let segments: Vec<&str> = pattern.split('.').collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::InvalidPattern(pattern.to_string()));
    }
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('*') && (*segment != "*" || i != segments.len() - 1) {
            return Err(ConfigError::InvalidPattern(pattern.to_string()));
        }
    }
    Ok(())
}

/// Returns `Some(specificity)` when `pattern` matches `type_name`, where a
/// higher specificity means a longer literal prefix under longest-prefix-wins
/// resolution. A single trailing `*` segment matches any
/// number of further segments; there is no other wildcard form.
fn namespace_specificity(pattern: &str, type_name: &str) -> Option<usize> {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let name_segments: Vec<&str> = type_name.split('.').collect();

    if let Some((&"*", literal)) = pattern_segments.split_last() {
        if literal.len() > name_segments.len() {
            return None;
        }
        if literal.iter().zip(&name_segments).all(|(p, n)| p == n) {
            return Some(literal.len());
        }
        None
    } else {
        if pattern_segments.len() != name_segments.len() {
            return None;
        }
        if pattern_segments.iter().zip(&name_segments).all(|(p, n)| p == n) {
            Some(pattern_segments.len())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_defaults_apply_with_no_layers() {
        let provider = ConfigurationProvider::new();
        let config = provider.resolve("acme.Service", "DoWork");
        assert_eq!(config, OperationConfiguration::default());
    }

    #[test]
    fn method_layer_overrides_type_layer() {
        let provider = ConfigurationProvider::new();
        provider
            .apply(
                LayerTarget::Type("acme.Service".into()),
                ConfigLayer {
                    sampling_rate: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();
        provider
            .apply(
                LayerTarget::Method("acme.Service".into(), "DoWork".into()),
                ConfigLayer {
                    sampling_rate: Some(0.1),
                    ..Default::default()
                },
            )
            .unwrap();
        let config = provider.resolve("acme.Service", "DoWork");
        assert_eq!(config.sampling_rate, 0.1);
        let other = provider.resolve("acme.Service", "OtherMethod");
        assert_eq!(other.sampling_rate, 0.5);
    }

    #[test]
    fn longest_namespace_prefix_wins() {
        let provider = ConfigurationProvider::new();
        provider
            .apply(
                LayerTarget::Namespace("acme.*".into()),
                ConfigLayer {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        provider
            .apply(
                LayerTarget::Namespace("acme.billing.*".into()),
                ConfigLayer {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        let billing = provider.resolve("acme.billing.Invoices", "Charge");
        assert!(billing.enabled);
        let other = provider.resolve("acme.shipping.Labels", "Print");
        assert!(!other.enabled);
    }

    #[test]
    fn invalid_sampling_rate_is_rejected_atomically() {
        let provider = ConfigurationProvider::new();
        let before = provider.resolve("acme.Service", "DoWork");
        let result = provider.apply(
            LayerTarget::Global,
            ConfigLayer {
                sampling_rate: Some(2.0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
        let after = provider.resolve("acme.Service", "DoWork");
        assert_eq!(before, after);
    }

    #[test]
    fn apply_invalidates_the_resolution_cache() {
        let provider = ConfigurationProvider::new();
        assert!(provider.resolve("acme.Service", "DoWork").enabled);
        provider
            .apply(
                LayerTarget::Global,
                ConfigLayer {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!provider.resolve("acme.Service", "DoWork").enabled);
    }

    #[test]
    fn tags_are_union_merged_with_later_layers_winning() {
        let provider = ConfigurationProvider::new();
        provider
            .apply(
                LayerTarget::Global,
                ConfigLayer {
                    tags: HashMap::from([("env".to_string(), "prod".to_string())]),
                    ..Default::default()
                },
            )
            .unwrap();
        provider
            .apply(
                LayerTarget::Type("acme.Service".into()),
                ConfigLayer {
                    tags: HashMap::from([("team".to_string(), "payments".to_string())]),
                    ..Default::default()
                },
            )
            .unwrap();
        let config = provider.resolve("acme.Service", "DoWork");
        assert_eq!(config.tags.get("env"), Some(&"prod".to_string()));
        assert_eq!(config.tags.get("team"), Some(&"payments".to_string()));
    }

    #[test]
    fn config_layer_round_trips_through_json() {
        let layer = ConfigLayer {
            sampling_rate: Some(0.25),
            enabled: Some(true),
            parameter_capture: Some(ParameterCaptureLevel::NamesAndValues),
            record_exceptions: Some(false),
            timeout_threshold_ms: Some(5_000),
            tags: HashMap::from([("region".to_string(), "us-east-1".to_string())]),
        };
        let json = serde_json::to_string(&layer).unwrap();
        let decoded: ConfigLayer = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.sampling_rate, layer.sampling_rate);
        assert_eq!(decoded.enabled, layer.enabled);
        assert_eq!(decoded.parameter_capture, layer.parameter_capture);
        assert_eq!(decoded.record_exceptions, layer.record_exceptions);
        assert_eq!(decoded.timeout_threshold_ms, layer.timeout_threshold_ms);
        assert_eq!(decoded.tags, layer.tags);
    }

    /// Hosts typically load layers from a config file at startup; `apply`
    /// must accept a layer that round-tripped through JSON exactly as it
    /// would one built in code.
    #[test]
    fn provider_accepts_a_layer_deserialized_from_json() {
        let json = r#"{"sampling_rate": 0.75, "enabled": false, "tags": {}}"#;
        let layer: ConfigLayer = serde_json::from_str(json).unwrap();
        let provider = ConfigurationProvider::new();
        provider.apply(LayerTarget::Global, layer).unwrap();
        let config = provider.resolve("acme.Service", "DoWork");
        assert_eq!(config.sampling_rate, 0.75);
        assert!(!config.enabled);
    }
}
