//! Layer discovery across a hierarchy of configuration directories.
//!
//! A target path like `account=x/env=y/region=z/cluster=w` encodes one
//! hierarchy level per component. Every prefix directory from root to leaf
//! contributes a layer of YAML files, least specific first; files within a
//! directory are consumed in lexicographic order. Both orders are
//! load-bearing: later layers override earlier ones.

use crate::error::{GenerateError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One YAML file discovered at one level of the hierarchy.
///
/// Immutable once parsed; an empty or null document yields an empty mapping.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Source file the content was parsed from.
    pub path: PathBuf,
    /// Parsed top-level mapping.
    pub content: Value,
}

/// The ordered sequence of per-directory YAML file lists for a target path.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    /// Directories from root-most to leaf, each with its sorted file list.
    /// Directories that do not exist or hold no YAML files contribute an
    /// empty list.
    pub levels: Vec<Vec<PathBuf>>,
}

impl Hierarchy {
    /// Walk the target path and collect YAML files for every prefix
    /// directory, outermost first.
    ///
    /// Fails with [`GenerateError::Hierarchy`] when the resolved target does
    /// not exist at all; intermediate directories without YAML files are
    /// fine and contribute empty levels.
    pub fn discover(cwd: &Path, target: &str) -> Result<Self> {
        let full_target = cwd.join(target);
        if !full_target.exists() {
            return Err(GenerateError::Hierarchy(target.to_string()));
        }

        let mut levels = Vec::new();
        let mut dir = cwd.to_path_buf();
        for component in Path::new(target).components() {
            dir.push(component);
            levels.push(yaml_files_in(&dir));
        }
        debug!(target, levels = levels.len(), "discovered hierarchy");
        Ok(Self { levels })
    }

    /// Parse every discovered file into a [`Layer`], in hierarchy order.
    pub fn load_layers(&self) -> Result<Vec<Layer>> {
        let mut layers = Vec::new();
        for level in &self.levels {
            for path in level {
                layers.push(load_layer(path)?);
            }
        }
        Ok(layers)
    }
}

/// List the `*.yaml` / `*.yml` files directly inside `dir`, sorted
/// lexicographically by filename. A missing directory yields an empty list.
fn yaml_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));
    files
}

fn load_layer(path: &Path) -> Result<Layer> {
    let text = std::fs::read_to_string(path)?;
    let content: Value = if text.trim().is_empty() {
        Value::Mapping(serde_yaml::Mapping::new())
    } else {
        serde_yaml::from_str(&text).map_err(|source| GenerateError::Layer {
            path: path.to_path_buf(),
            source,
        })?
    };

    let content = match content {
        Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
        mapping @ Value::Mapping(_) => mapping,
        _ => {
            return Err(GenerateError::Layer {
                path: path.to_path_buf(),
                source: serde::de::Error::custom("top-level document must be a mapping"),
            });
        }
    };

    Ok(Layer {
        path: path.to_path_buf(),
        content,
    })
}

/// Extract the `key=value` pairs encoded in a target path's components.
///
/// Components without an `=` are plain directories and are skipped.
pub fn path_values(target: &str) -> BTreeMap<String, String> {
    target
        .split('/')
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Discover the compositions reachable from a target path.
///
/// A `composition=` segment in the path selects exactly that composition.
/// Otherwise the terminal directory is scanned for `composition=*` children
/// and all of their names are returned, unsorted.
pub fn discover_compositions(cwd: &Path, target: &str) -> Vec<String> {
    if let Some(name) = path_values(target).get("composition") {
        return vec![name.clone()];
    }

    let dir = cwd.join(target);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("composition="))
                .map(str::to_string)
        })
        .collect()
}

/// Append a `composition=` segment to a config path prefix, unless the
/// prefix already selects one.
pub fn config_path_for_composition(prefix: &str, composition: &str) -> String {
    if prefix.contains("composition=") {
        return prefix.to_string();
    }
    format!(
        "{}/composition={}",
        prefix.trim_end_matches('/'),
        composition
    )
}

/// Orders discovered compositions by a caller-supplied run order.
#[derive(Debug, Clone)]
pub struct CompositionSorter {
    order: Vec<String>,
}

impl CompositionSorter {
    pub fn new(order: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            order: order.into_iter().map(Into::into).collect(),
        }
    }

    /// Filter the run order down to the discovered names. Unknown
    /// compositions are dropped; `reverse` flips the result (teardown order).
    pub fn sorted(&self, discovered: &[String], reverse: bool) -> Vec<String> {
        let mut result: Vec<String> = self
            .order
            .iter()
            .filter(|name| discovered.contains(name))
            .cloned()
            .collect();
        if reverse {
            result.reverse();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_levels_are_root_to_leaf() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: 1\n");
        write(&root.join("env=dev/cluster=c1/default.yaml"), "a: 2\n");

        let hierarchy = Hierarchy::discover(root, "env=dev/cluster=c1").unwrap();
        assert_eq!(hierarchy.levels.len(), 2);
        assert_eq!(hierarchy.levels[0].len(), 1);
        assert!(hierarchy.levels[0][0].ends_with("env=dev/default.yaml"));
        assert!(hierarchy.levels[1][0].ends_with("cluster=c1/default.yaml"));
    }

    #[test]
    fn test_files_within_level_are_sorted() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/zz.yaml"), "x: z\n");
        write(&root.join("env=dev/aa.yaml"), "x: a\n");
        write(&root.join("env=dev/mm.yml"), "x: m\n");

        let hierarchy = Hierarchy::discover(root, "env=dev").unwrap();
        let names: Vec<_> = hierarchy.levels[0]
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["aa.yaml", "mm.yml", "zz.yaml"]);
    }

    #[test]
    fn test_level_without_yaml_is_empty_not_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("plain/env=dev/default.yaml"), "a: 1\n");
        std::fs::write(root.join("plain/readme.txt"), "not yaml").unwrap();

        let hierarchy = Hierarchy::discover(root, "plain/env=dev").unwrap();
        assert!(hierarchy.levels[0].is_empty());
        assert_eq!(hierarchy.levels[1].len(), 1);
    }

    #[test]
    fn test_missing_target_is_hierarchy_error() {
        let temp = TempDir::new().unwrap();
        let err = Hierarchy::discover(temp.path(), "env=missing").unwrap_err();
        assert!(matches!(err, GenerateError::Hierarchy(_)));
    }

    #[test]
    fn test_empty_file_parses_to_empty_mapping() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/empty.yaml"), "");
        write(&root.join("env=dev/comment.yaml"), "# only a comment\n");

        let hierarchy = Hierarchy::discover(root, "env=dev").unwrap();
        let layers = hierarchy.load_layers().unwrap();
        assert_eq!(layers.len(), 2);
        for layer in layers {
            assert_eq!(layer.content, Value::Mapping(serde_yaml::Mapping::new()));
        }
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/list.yaml"), "- 1\n- 2\n");

        let hierarchy = Hierarchy::discover(root, "env=dev").unwrap();
        let err = hierarchy.load_layers().unwrap_err();
        assert!(matches!(err, GenerateError::Layer { .. }));
    }

    #[test]
    fn test_path_values() {
        let values = path_values("clusters/account=x/env=dev/cluster=c1");
        assert_eq!(values.get("account").unwrap(), "x");
        assert_eq!(values.get("env").unwrap(), "dev");
        assert_eq!(values.get("cluster").unwrap(), "c1");
        assert!(!values.contains_key("clusters"));
    }

    #[test]
    fn test_discover_compositions_from_segment() {
        let temp = TempDir::new().unwrap();
        let found = discover_compositions(temp.path(), "env=dev/composition=terraform");
        assert_eq!(found, vec!["terraform"]);
    }

    #[test]
    fn test_discover_compositions_from_children() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("env=dev/composition=terraform")).unwrap();
        std::fs::create_dir_all(root.join("env=dev/composition=helmfile")).unwrap();
        std::fs::create_dir_all(root.join("env=dev/notes")).unwrap();

        let mut found = discover_compositions(root, "env=dev");
        found.sort();
        assert_eq!(found, vec!["helmfile", "terraform"]);
    }

    #[test]
    fn test_composition_sorter_orders_and_filters() {
        let sorter = CompositionSorter::new(["comp1", "compB", "comp3"]);
        let discovered = vec![
            "comp3".to_string(),
            "comp1".to_string(),
            "compB".to_string(),
        ];
        assert_eq!(sorter.sorted(&discovered, false), vec!["comp1", "compB", "comp3"]);
    }

    #[test]
    fn test_composition_sorter_ignores_unknown() {
        let sorter = CompositionSorter::new(["comp1", "comp2"]);
        let discovered = vec![
            "comp2".to_string(),
            "comp1".to_string(),
            "unknown_composition".to_string(),
        ];
        assert_eq!(sorter.sorted(&discovered, false), vec!["comp1", "comp2"]);
    }

    #[test]
    fn test_composition_sorter_reverse() {
        let sorter = CompositionSorter::new(["comp1", "comp2"]);
        let discovered = vec!["comp1".to_string(), "comp2".to_string()];
        assert_eq!(sorter.sorted(&discovered, true), vec!["comp2", "comp1"]);
    }

    #[test]
    fn test_config_path_for_composition() {
        assert_eq!(
            config_path_for_composition("env=dev/cluster=c1", "terraform"),
            "env=dev/cluster=c1/composition=terraform"
        );
        assert_eq!(
            config_path_for_composition("env=dev/composition=terraform", "terraform"),
            "env=dev/composition=terraform"
        );
    }
}
