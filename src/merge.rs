//! Deep merge for layered YAML configurations.
//!
//! Implements value-by-value merging where later (more specific) layers
//! override earlier ones. Mappings merge recursively, sequences are appended,
//! scalars are replaced. Key insertion order is preserved: keys keep the
//! position of their first appearance across all layers.

use crate::error::{GenerateError, Result};
use serde_yaml::Value;

/// Deep merge two YAML values, with `incoming` taking precedence over `base`.
///
/// - Mappings are merged recursively: keys in both recurse, keys only in
///   `incoming` are appended, keys only in `base` are kept in place
/// - Sequences are appended after the base elements, without de-duplication
/// - Scalars (including null) replace the base value entirely
/// - Tagged values have no merge policy and fail with
///   [`GenerateError::MergeType`]
pub fn deep_merge(base: Value, incoming: Value) -> Result<Value> {
    merge_keyed(base, incoming, "")
}

/// Fold an ordered sequence of layer mappings into one merged mapping.
///
/// Layers must be supplied in hierarchy order (least specific first); the
/// last layer's scalars and sequence-appends win positionally.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Result<Value> {
    let mut merged = Value::Mapping(serde_yaml::Mapping::new());
    for layer in layers {
        merged = deep_merge(merged, layer)?;
    }
    Ok(merged)
}

fn merge_keyed(base: Value, incoming: Value, key: &str) -> Result<Value> {
    match (base, incoming) {
        // Both are mappings: merge recursively, overridden keys keep their
        // base position, new keys are appended in incoming order
        (Value::Mapping(mut base_map), Value::Mapping(incoming_map)) => {
            for (k, incoming_value) in incoming_map {
                match base_map.get_mut(&k) {
                    Some(slot) => {
                        let base_value = std::mem::replace(slot, Value::Null);
                        *slot = merge_keyed(base_value, incoming_value, &key_text(&k))?;
                    }
                    None => {
                        base_map.insert(k, incoming_value);
                    }
                }
            }
            Ok(Value::Mapping(base_map))
        }
        // Both are sequences: append, never deduplicate
        (Value::Sequence(mut base_seq), Value::Sequence(incoming_seq)) => {
            base_seq.extend(incoming_seq);
            Ok(Value::Sequence(base_seq))
        }
        // No merge policy for tagged values
        (_, Value::Tagged(tagged)) => Err(GenerateError::MergeType {
            key: key.to_string(),
            tag: tagged.tag.to_string(),
        }),
        // Any other case: incoming replaces base entirely
        (_, incoming) => Ok(incoming),
    }
}

/// Render a mapping key for error messages. Keys are almost always strings;
/// non-string scalar keys fall back to their YAML representation.
pub(crate) fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
