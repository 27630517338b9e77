//! End-to-end config generation.
//!
//! Ties the stages together: hierarchy discovery, layer merge, remote state
//! augmentation, interpolation, shaping (filter / exclude / enclose),
//! validation and rendering.

use crate::error::{GenerateError, Result};
use crate::hierarchy::{self, Hierarchy};
use crate::interpolate::{InterpolationEngine, InterpolationValidator};
use crate::merge;
use crate::remote_state::RemoteStateRetriever;
use crate::secrets::SecretResolverRegistry;
use crate::tree::{self, OutputFormat};
use serde_yaml::Value;
use std::path::PathBuf;
use tracing::{debug, info};

/// Everything one generation run needs to know.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Root the hierarchy path is resolved against; defaults to the current
    /// working directory.
    pub cwd: Option<PathBuf>,
    /// Hierarchy path of `key=value` segments, e.g. `env=dev/cluster=c1`.
    pub path: String,
    /// Top-level keys to keep; empty keeps everything.
    pub filters: Vec<String>,
    /// Top-level keys to drop after filtering.
    pub exclude_keys: Vec<String>,
    /// Wrap the final tree under this single key.
    pub enclosing_key: Option<String>,
    pub output_format: OutputFormat,
    /// Print the rendered output to stdout.
    pub print_data: bool,
    /// Write the rendered output to this file.
    pub output_file: Option<PathBuf>,
    /// Leave placeholders untouched; implies skipping validation.
    pub skip_interpolations: bool,
    pub skip_interpolation_validation: bool,
}

impl ProcessOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            cwd: None,
            path: path.into(),
            filters: Vec::new(),
            exclude_keys: Vec::new(),
            enclosing_key: None,
            output_format: OutputFormat::Yaml,
            print_data: false,
            output_file: None,
            skip_interpolations: false,
            skip_interpolation_validation: false,
        }
    }

    /// Shell-style echo of the run, logged so a generation can be replayed
    /// by hand.
    fn command_line(&self) -> String {
        let mut parts = vec!["layercake".to_string(), self.path.clone()];
        for filter in &self.filters {
            parts.push(format!("--filter {}", filter));
        }
        for key in &self.exclude_keys {
            parts.push(format!("--exclude {}", key));
        }
        if let Some(ref key) = self.enclosing_key {
            parts.push(format!("--enclosing-key {}", key));
        }
        if let Some(ref file) = self.output_file {
            parts.push(format!("--output-file {}", file.display()));
        }
        if self.skip_interpolations {
            parts.push("--skip-interpolation-resolving".to_string());
        }
        if self.skip_interpolation_validation {
            parts.push("--skip-interpolation-validation".to_string());
        }
        parts.join(" ")
    }
}

/// Drives one generation run over injected secret and state backends.
pub struct ConfigProcessor<'a> {
    registry: &'a SecretResolverRegistry,
    state_store: &'a dyn crate::remote_state::StateStore,
}

impl<'a> ConfigProcessor<'a> {
    pub fn new(
        registry: &'a SecretResolverRegistry,
        state_store: &'a dyn crate::remote_state::StateStore,
    ) -> Self {
        Self {
            registry,
            state_store,
        }
    }

    /// Run the full pipeline and return the final tree (pre-serialization,
    /// post-enclose).
    pub fn process(&self, options: &ProcessOptions) -> Result<Value> {
        debug!(command = %options.command_line(), "starting generation");

        let cwd = match &options.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        // A path that stops above its compositions is ambiguous: there is no
        // single config to generate.
        if !options.path.contains("composition=") {
            let found = hierarchy::discover_compositions(&cwd, &options.path);
            if found.len() > 1 {
                return Err(GenerateError::AmbiguousComposition {
                    path: options.path.clone(),
                    found: found.join(", "),
                });
            }
        }

        let discovered = Hierarchy::discover(&cwd, &options.path)?;
        let layers = discovered.load_layers()?;
        info!(path = %options.path, layers = layers.len(), "merging hierarchy layers");
        let mut tree = merge::merge_layers(layers.into_iter().map(|layer| layer.content))?;

        let skip_validation =
            options.skip_interpolation_validation || options.skip_interpolations;
        if !options.skip_interpolations {
            RemoteStateRetriever::new(self.state_store).augment(&mut tree)?;
            InterpolationEngine::new(self.registry).resolve(&mut tree)?;
        }

        if !options.filters.is_empty() {
            tree::filter_keys(&mut tree, &options.filters);
        }
        if !options.exclude_keys.is_empty() {
            tree::exclude_keys(&mut tree, &options.exclude_keys);
        }

        if !skip_validation {
            InterpolationValidator::check(&tree)?;
        }

        let tree = match &options.enclosing_key {
            Some(key) => tree::enclose(tree, key),
            None => tree,
        };

        let rendered = tree::render(&tree, options.output_format)?;
        if options.print_data {
            println!("{}", rendered);
        }
        if let Some(ref path) = options.output_file {
            tree::write_output(path, &rendered)?;
        }

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_state::StateStore;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoStates;

    impl StateStore for NoStates {
        fn fetch(
            &self,
            _bucket: &str,
            _key: &str,
            _profile: &str,
        ) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn run(root: &Path, options: ProcessOptions) -> Result<Value> {
        let registry = SecretResolverRegistry::new();
        let processor = ConfigProcessor::new(&registry, &NoStates);
        let options = ProcessOptions {
            cwd: Some(root.to_path_buf()),
            ..options
        };
        processor.process(&options)
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_leaf_overrides_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: root\nkeep: true\n");
        write(
            &root.join("env=dev/cluster=c1/default.yaml"),
            "a: leaf\n",
        );

        let tree = run(root, ProcessOptions::new("env=dev/cluster=c1")).unwrap();
        assert_eq!(tree.get("a"), Some(&Value::String("leaf".into())));
        assert_eq!(tree.get("keep"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_ambiguous_composition_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            &root.join("env=dev/composition=terraform/default.yaml"),
            "a: 1\n",
        );
        write(
            &root.join("env=dev/composition=helmfile/default.yaml"),
            "a: 2\n",
        );

        let err = run(root, ProcessOptions::new("env=dev")).unwrap_err();
        assert!(matches!(err, GenerateError::AmbiguousComposition { .. }));
    }

    #[test]
    fn test_single_composition_child_is_not_ambiguous() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: 1\n");
        write(
            &root.join("env=dev/composition=terraform/default.yaml"),
            "b: 2\n",
        );

        // Cluster-level generation over a single composition child merges
        // only the cluster layers.
        let tree = run(root, ProcessOptions::new("env=dev")).unwrap();
        assert_eq!(tree, yaml("{a: 1}"));
    }

    #[test]
    fn test_filter_exclude_and_enclose() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            &root.join("env=dev/default.yaml"),
            "a: 1\nb: 2\nc: 3\n",
        );

        let tree = run(
            root,
            ProcessOptions {
                filters: vec!["a".into(), "b".into()],
                exclude_keys: vec!["b".into()],
                enclosing_key: Some("config".into()),
                ..ProcessOptions::new("env=dev")
            },
        )
        .unwrap();
        assert_eq!(tree, yaml("{config: {a: 1}}"));
    }

    #[test]
    fn test_unresolved_placeholder_fails_validation() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: '{{missing.ref}}'\n");

        let err = run(root, ProcessOptions::new("env=dev")).unwrap_err();
        assert!(matches!(err, GenerateError::Validation(_)));
    }

    #[test]
    fn test_skip_resolving_implies_skip_validation() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: '{{missing.ref}}'\n");

        let tree = run(
            root,
            ProcessOptions {
                skip_interpolations: true,
                ..ProcessOptions::new("env=dev")
            },
        )
        .unwrap();
        assert_eq!(tree.get("a"), Some(&Value::String("{{missing.ref}}".into())));
    }

    #[test]
    fn test_excluded_subtree_escapes_validation() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            &root.join("env=dev/default.yaml"),
            "a: 1\ndeferred: '{{later.value}}'\n",
        );

        let tree = run(
            root,
            ProcessOptions {
                exclude_keys: vec!["deferred".into()],
                ..ProcessOptions::new("env=dev")
            },
        )
        .unwrap();
        assert_eq!(tree, yaml("{a: 1}"));
    }

    #[test]
    fn test_output_file_is_written() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("env=dev/default.yaml"), "a: 1\n");
        let out = root.join("generated/config.yaml");

        run(
            root,
            ProcessOptions {
                output_file: Some(out.clone()),
                ..ProcessOptions::new("env=dev")
            },
        )
        .unwrap();

        let written: Value =
            serde_yaml::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(written, yaml("{a: 1}"));
    }

    #[test]
    fn test_missing_path_is_hierarchy_error() {
        let temp = TempDir::new().unwrap();
        let err = run(temp.path(), ProcessOptions::new("env=absent")).unwrap_err();
        assert!(matches!(err, GenerateError::Hierarchy(_)));
    }
}
