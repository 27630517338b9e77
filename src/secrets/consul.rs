//! Consul KV access.
//!
//! Reads a single key or a whole subtree. Subtree reads reassemble the flat
//! `a/b/c` key space into nested mappings via right-precedent deep merge,
//! so later entries win over earlier ones on conflicts.
//!
//! Shares the [`SecretResolver`] shape so a Consul-backed chain entry can be
//! pushed onto the registry, but is not part of the default chain.

use super::{SecretParams, SecretResolver, require_param};
use crate::error::{GenerateError, Result};
use crate::merge::deep_merge;
use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_yaml::Value;
use std::time::Duration;

/// Key/value access against a Consul-like store.
pub trait ConsulKv {
    /// Read one key's value.
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// List all `(key, value)` pairs under `prefix/`, recursively.
    fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Option<String>)>>;
}

/// Default [`ConsulKv`] over the Consul HTTP API.
pub struct HttpConsul {
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
    client: reqwest::blocking::Client,
}

/// Wire format of `/v1/kv/...?recurse` entries. Values are base64-encoded.
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl HttpConsul {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build consul http client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            datacenter: None,
            client,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.datacenter = Some(dc.into());
        self
    }

    fn kv_url(&self, key: &str) -> String {
        // Slashes are path structure in consul keys; encode the segments only
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/v1/kv/{}", self.base_url, encoded.join("/"))
    }

    fn request(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(ref token) = self.token {
            req = req.header("X-Consul-Token", token);
        }
        if let Some(ref dc) = self.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        req
    }
}

impl ConsulKv for HttpConsul {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let url = self.kv_url(key);
        let response = self
            .request(&url)
            .query(&[("raw", "true")])
            .send()
            .with_context(|| format!("consul request failed for key '{}'", key))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("consul returned an error for key '{}'", key))?;
        Ok(Some(response.text()?))
    }

    fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Option<String>)>> {
        let url = self.kv_url(&format!("{}/", prefix.trim_end_matches('/')));
        let response = self
            .request(&url)
            .query(&[("recurse", "true")])
            .send()
            .with_context(|| format!("consul request failed for prefix '{}'", prefix))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let entries: Vec<KvEntry> = response
            .error_for_status()
            .with_context(|| format!("consul returned an error for prefix '{}'", prefix))?
            .json()
            .context("consul recurse response was not valid JSON")?;

        entries
            .into_iter()
            .map(|entry| {
                let value = entry
                    .value
                    .map(|encoded| {
                        BASE64
                            .decode(&encoded)
                            .context("consul value was not valid base64")
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    })
                    .transpose()?;
                Ok((entry.key, value))
            })
            .collect()
    }
}

/// Read a key, optionally recursing into its subtree.
///
/// Non-recursive reads return the single value as a string scalar. Recursive
/// reads reassemble every `prefix/a/b` entry into nested mappings, merged
/// right-precedent; when the subtree is empty the single value (if any) is
/// returned instead.
pub fn get_tree(kv: &dyn ConsulKv, key: &str, recurse: bool) -> anyhow::Result<Option<Value>> {
    let single = kv.get(key)?.map(Value::String);
    if !recurse {
        return Ok(single);
    }

    let mut aggregated = Value::Mapping(serde_yaml::Mapping::new());
    let mut saw_entries = false;
    for (entry_key, entry_value) in kv.list(key)? {
        let mut atoms: Vec<&str> = entry_key.split('/').collect();
        let leaf = atoms.pop().unwrap_or("");

        let mut nested = if leaf.is_empty() {
            // Directory marker key ("a/b/"): contributes structure only
            Value::Mapping(serde_yaml::Mapping::new())
        } else {
            let mut mapping = serde_yaml::Mapping::new();
            mapping.insert(
                Value::String(leaf.to_string()),
                entry_value.map(Value::String).unwrap_or(Value::Null),
            );
            Value::Mapping(mapping)
        };
        for atom in atoms.into_iter().rev() {
            let mut wrapper = serde_yaml::Mapping::new();
            wrapper.insert(Value::String(atom.to_string()), nested);
            nested = Value::Mapping(wrapper);
        }

        aggregated = deep_merge(aggregated, nested)?;
        saw_entries = true;
    }

    if saw_entries {
        Ok(Some(aggregated))
    } else {
        Ok(single)
    }
}

/// Secret backend for the `consul` type token. Resolves single keys only;
/// subtrees have no string form.
pub struct ConsulSecretResolver {
    kv: Box<dyn ConsulKv>,
}

impl ConsulSecretResolver {
    pub fn new(kv: Box<dyn ConsulKv>) -> Self {
        Self { kv }
    }
}

impl SecretResolver for ConsulSecretResolver {
    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "consul"
    }

    fn resolve(&self, _secret_type: &str, params: &SecretParams) -> Result<String> {
        let path = require_param("path", params)?;
        match self.kv.get(path) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(GenerateError::SecretBackend {
                backend: "consul".to_string(),
                key: path.to_string(),
                source: anyhow::anyhow!("key not found"),
            }),
            Err(source) => Err(GenerateError::SecretBackend {
                backend: "consul".to_string(),
                key: path.to_string(),
                source,
            }),
        }
    }
}
