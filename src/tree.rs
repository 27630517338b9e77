//! Operations on the merged configuration tree.
//!
//! The tree is a `serde_yaml::Value` mapping with insertion-ordered keys.
//! Filtering, exclusion and enclosing operate on top-level keys only;
//! rendering serializes to block-style YAML or to JSON via YAML→JSON
//! reinterpretation.

use crate::error::{GenerateError, Result};
use crate::merge::key_text;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Output format for the rendered tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl OutputFormat {
    /// Parse a format token. Unknown tokens are fatal.
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_lowercase().as_str() {
            "yaml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            _ => Err(GenerateError::Format(token.to_string())),
        }
    }
}

/// Keep only the named top-level keys, preserving their relative order from
/// the tree. Filter keys absent from the tree are silently dropped.
pub fn filter_keys(tree: &mut Value, keys: &[String]) {
    let Value::Mapping(mapping) = tree else {
        return;
    };
    let retained: Mapping = std::mem::take(mapping)
        .into_iter()
        .filter(|(k, _)| keys.iter().any(|wanted| *wanted == key_text(k)))
        .collect();
    *mapping = retained;
}

/// Remove the named top-level keys if present; no-op otherwise.
pub fn exclude_keys(tree: &mut Value, keys: &[String]) {
    let Value::Mapping(mapping) = tree else {
        return;
    };
    for key in keys {
        mapping.shift_remove(Value::String(key.clone()));
    }
}

/// Wrap the entire tree under one enclosing key.
pub fn enclose(tree: Value, key: &str) -> Value {
    let mut wrapper = Mapping::new();
    wrapper.insert(Value::String(key.to_string()), tree);
    Value::Mapping(wrapper)
}

/// Flatten the tree's scalar leaves into dotted-key → value pairs.
///
/// Only mappings are descended; sequences count as leaves of their parent
/// key and are not addressable by dotted path.
pub fn flatten_leaves(tree: &Value) -> BTreeMap<String, Value> {
    let mut leaves = BTreeMap::new();
    collect_leaves(tree, String::new(), &mut leaves);
    leaves
}

fn collect_leaves(value: &Value, prefix: String, leaves: &mut BTreeMap<String, Value>) {
    match value {
        Value::Mapping(mapping) => {
            for (k, v) in mapping {
                let key = key_text(k);
                let child = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_leaves(v, child, leaves);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            if !prefix.is_empty() {
                leaves.insert(prefix, value.clone());
            }
        }
        // Sequences and tagged values are not addressable
        _ => {}
    }
}

/// Serialize the tree to the chosen format.
///
/// YAML output is block style with keys in insertion order. JSON output
/// reinterprets the YAML tree with a 4-space indent; non-string mapping
/// keys are stringified.
pub fn render(tree: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            serde_yaml::to_string(tree).map_err(|e| GenerateError::Io(std::io::Error::other(e)))
        }
        OutputFormat::Json => {
            let json = yaml_to_json(tree);
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(&json, &mut serializer)
                .map_err(|e| GenerateError::Io(std::io::Error::other(e)))?;
            Ok(String::from_utf8_lossy(&out).into_owned())
        }
    }
}

/// Reinterpret a YAML value as JSON. Tagged values lose their tag.
pub fn yaml_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64().map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        Value::Mapping(mapping) => serde_json::Value::Object(
            mapping
                .iter()
                .map(|(k, v)| (key_text(k), yaml_to_json(v)))
                .collect(),
        ),
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Write rendered output to a file, creating parent directories as needed.
pub fn write_output(path: &Path, rendered: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, rendered)?;
    debug!(path = %path.display(), bytes = rendered.len(), "wrote generated config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_filter_preserves_tree_order() {
        let mut tree = yaml("{c: 3, a: 1, b: 2}");
        filter_keys(&mut tree, &["a".into(), "c".into()]);
        let keys: Vec<String> = tree.as_mapping().unwrap().keys().map(key_text).collect();
        assert_eq!(keys, vec!["c", "a"]);
    }

    #[test]
    fn test_filter_drops_absent_keys_silently() {
        let mut tree = yaml("{a: 1}");
        filter_keys(&mut tree, &["a".into(), "missing".into()]);
        assert_eq!(tree, yaml("{a: 1}"));
    }

    #[test]
    fn test_exclude_is_noop_for_absent_keys() {
        let mut tree = yaml("{a: 1, b: 2}");
        exclude_keys(&mut tree, &["b".into(), "missing".into()]);
        assert_eq!(tree, yaml("{a: 1}"));
    }

    #[test]
    fn test_filter_then_exclude_outside_set_is_filter_alone() {
        let mut filtered = yaml("{a: 1, b: 2, c: 3}");
        filter_keys(&mut filtered, &["a".into(), "b".into()]);

        let mut both = yaml("{a: 1, b: 2, c: 3}");
        filter_keys(&mut both, &["a".into(), "b".into()]);
        exclude_keys(&mut both, &["c".into()]);

        assert_eq!(filtered, both);
    }

    #[test]
    fn test_enclose_wraps_and_unwraps() {
        let tree = yaml("{a: 1}");
        let wrapped = enclose(tree.clone(), "config");
        assert_eq!(wrapped, yaml("{config: {a: 1}}"));

        let unwrapped = wrapped
            .as_mapping()
            .unwrap()
            .get(Value::String("config".into()))
            .unwrap();
        assert_eq!(*unwrapped, tree);
    }

    #[test]
    fn test_flatten_leaves() {
        let tree = yaml("{env: {name: dev, count: 3}, flag: true, items: [1, 2]}");
        let leaves = flatten_leaves(&tree);
        assert_eq!(leaves.get("env.name").unwrap(), &yaml("dev"));
        assert_eq!(leaves.get("env.count").unwrap(), &yaml("3"));
        assert_eq!(leaves.get("flag").unwrap(), &yaml("true"));
        assert!(!leaves.contains_key("items"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let tree = yaml("{env: {name: dev}, list: [1, 2, a], flag: false}");
        let rendered = render(&tree, OutputFormat::Yaml).unwrap();
        let reparsed: Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn test_json_render_uses_four_space_indent() {
        let tree = yaml("{env: {name: dev}}");
        let rendered = render(&tree, OutputFormat::Json).unwrap();
        assert!(rendered.contains("\n    \"env\""));
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["env"]["name"], "dev");
    }

    #[test]
    fn test_unknown_format_is_fatal() {
        let err = OutputFormat::parse("toml").unwrap_err();
        assert!(matches!(err, GenerateError::Format(_)));
    }

    #[test]
    fn test_format_parse_is_case_insensitive() {
        assert_eq!(OutputFormat::parse("YAML").unwrap(), OutputFormat::Yaml);
        assert_eq!(OutputFormat::parse("Json").unwrap(), OutputFormat::Json);
    }
}
