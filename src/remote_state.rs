//! Terraform remote state augmentation.
//!
//! When the merged tree carries a `remote_states` list, each entry names a
//! state document in S3. The `outputs` object of every reachable document is
//! merged into the tree under `outputs.<name>` before interpolation runs, so
//! placeholders like `{{outputs.net.vpc_id}}` resolve against live
//! infrastructure state.

use crate::error::{GenerateError, Result};
use crate::merge::deep_merge;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::process::Command;
use tracing::{debug, warn};

/// Top-level key that declares remote state documents.
pub const REMOTE_STATES_KEY: &str = "remote_states";

/// One declared remote state document.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStateSpec {
    /// Alias the outputs are exposed under (`outputs.<name>.*`).
    pub name: String,
    pub s3_bucket: String,
    pub s3_key: String,
    pub aws_profile: String,
}

/// Fetches raw state documents. Injected so tests can substitute a fake.
pub trait StateStore {
    /// Read and parse one state document. `Ok(None)` means the object does
    /// not exist, which is normal for not-yet-applied state.
    fn fetch(
        &self,
        bucket: &str,
        key: &str,
        profile: &str,
    ) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Default [`StateStore`] backed by the `aws` CLI.
#[derive(Debug, Default)]
pub struct AwsCliStateStore;

impl StateStore for AwsCliStateStore {
    fn fetch(
        &self,
        bucket: &str,
        key: &str,
        profile: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let uri = format!("s3://{}/{}", bucket, key);
        let output = Command::new("aws")
            .args(["s3", "cp", &uri, "-"])
            .env("AWS_PROFILE", profile)
            .output()
            .map_err(|e| anyhow::anyhow!("failed to run 'aws s3 cp {}': {}", uri, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Missing state is not an error; the stack may not be applied yet
            if stderr.contains("NoSuchKey")
                || stderr.contains("404")
                || stderr.contains("does not exist")
            {
                return Ok(None);
            }
            anyhow::bail!("'aws s3 cp {}' failed: {}", uri, stderr.trim());
        }

        let document = serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow::anyhow!("state document at {} is not valid JSON: {}", uri, e))?;
        Ok(Some(document))
    }
}

/// Collects declared remote state outputs and merges them into the tree.
pub struct RemoteStateRetriever<'a> {
    store: &'a dyn StateStore,
}

impl<'a> RemoteStateRetriever<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Merge `outputs.<name>` for every `remote_states` entry into the tree.
    /// Missing documents are skipped; fetch and parse failures are fatal.
    /// A tree without a `remote_states` key is left untouched.
    pub fn augment(&self, tree: &mut Value) -> Result<()> {
        let Some(declared) = tree.get(REMOTE_STATES_KEY) else {
            return Ok(());
        };
        let specs: Vec<RemoteStateSpec> =
            serde_yaml::from_value(declared.clone()).map_err(|e| GenerateError::RemoteState {
                name: REMOTE_STATES_KEY.to_string(),
                source: anyhow::Error::from(e),
            })?;

        let mut outputs = Mapping::new();
        for spec in specs {
            match self.store.fetch(&spec.s3_bucket, &spec.s3_key, &spec.aws_profile) {
                Ok(Some(document)) => {
                    let Some(document_outputs) = document.get("outputs") else {
                        warn!(name = %spec.name, "state document has no outputs object");
                        continue;
                    };
                    let value: Value = serde_yaml::to_value(document_outputs).map_err(|e| {
                        GenerateError::RemoteState {
                            name: spec.name.clone(),
                            source: anyhow::Error::from(e),
                        }
                    })?;
                    outputs.insert(Value::String(spec.name), value);
                }
                Ok(None) => {
                    debug!(name = %spec.name, key = %spec.s3_key, "remote state not found, skipping");
                }
                Err(source) => {
                    return Err(GenerateError::RemoteState {
                        name: spec.name,
                        source,
                    });
                }
            }
        }

        let mut wrapper = Mapping::new();
        wrapper.insert(Value::String("outputs".to_string()), Value::Mapping(outputs));
        let merged = deep_merge(std::mem::take(tree), Value::Mapping(wrapper))?;
        *tree = merged;
        Ok(())
    }
}
