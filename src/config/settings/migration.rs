// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::{Map, Value};

use tracing::warn;

use crate::llm::provider::ProviderId;

/// Normalize hand-edited files before deserializing.
///
/// Provider names are accepted in any case and under their common aliases
/// ("gemini", "grok", "claude"), both as `providers` keys and as
/// `defaults.provider`. Sections for providers this build doesn't know are
/// left out of the loaded view; `save_to` merges them back untouched.
pub(super) fn migrate_on_load(mut value: Value) -> Value {
    if let Some(Value::Object(providers)) = value.get_mut("providers") {
        let renamed: Map<String, Value> = std::mem::take(providers)
            .into_iter()
            .filter_map(|(key, config)| match canonical_provider(&key) {
                Some(canonical) => Some((canonical, config)),
                None => {
                    warn!(target: "warden.config", provider = %key, "ignoring unknown provider section");
                    None
                }
            })
            .collect();
        *providers = renamed;
    }

    if let Some(provider) = value.pointer_mut("/defaults/provider") {
        if let Some(canonical) = provider.as_str().and_then(canonical_provider) {
            *provider = Value::String(canonical);
        }
    }

    value
}

fn canonical_provider(name: &str) -> Option<String> {
    name.parse::<ProviderId>()
        .ok()
        .map(|id| id.as_str().to_string())
}

/// Deep-merge two JSON values.
/// `base` is existing file content, `overlay` is serialized current struct.
/// Overlay values take priority.
pub(super) fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_base, overlay) => overlay,
    }
}
