//! Pluggable secret resolution.
//!
//! Placeholders like `{{ssm.path(/app/password).aws_profile(dev)}}` are
//! dispatched to a chain of backends. Backends are tried in registration
//! order; the first one whose `supports` returns true handles the call.

pub mod consul;
pub mod ssm;
pub mod vault;

use crate::error::{GenerateError, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Parameters parsed from a placeholder's function-call segments.
///
/// `path(/foo)` maps to `path -> Some("/foo")`; a bare segment like `kv2`
/// maps to `kv2 -> None`.
pub type SecretParams = BTreeMap<String, Option<String>>;

/// Render a parameter set for error messages, sorted by key.
pub fn format_params(params: &SecretParams) -> String {
    let parts: Vec<String> = params
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", k, v),
            None => k.clone(),
        })
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// Look up a required parameter, failing with the full parameter set in the
/// message when it is missing.
pub fn require_param<'a>(key: &str, params: &'a SecretParams) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| GenerateError::MissingSecretParam {
            key: key.to_string(),
            params: format_params(params),
        })
}

/// One secret backend in the resolution chain.
pub trait SecretResolver {
    /// Whether this backend handles the given secret type token.
    fn supports(&self, secret_type: &str) -> bool;

    /// Fetch the secret. Only called when `supports` returned true.
    fn resolve(&self, secret_type: &str, params: &SecretParams) -> Result<String>;
}

/// Ordered chain of secret backends with per-run memoization.
///
/// Repeated identical calls (same type and params) within one generation run
/// hit a process-local cache instead of the backend.
pub struct SecretResolverRegistry {
    resolvers: Vec<Box<dyn SecretResolver>>,
    cache: RefCell<HashMap<String, String>>,
}

impl SecretResolverRegistry {
    /// Build an empty registry. Backends are tried in push order.
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The default chain: SSM (over the given client) followed by the Vault
    /// KV v2 stub.
    pub fn default_chain(
        ssm_client: Box<dyn ssm::SsmClient>,
        default_aws_profile: Option<String>,
    ) -> Self {
        let mut registry = Self::new();
        registry.push(Box::new(ssm::SsmSecretResolver::new(
            ssm_client,
            default_aws_profile,
        )));
        registry.push(Box::new(vault::VaultKv2SecretResolver));
        registry
    }

    /// Append a backend to the chain.
    pub fn push(&mut self, resolver: Box<dyn SecretResolver>) {
        self.resolvers.push(resolver);
    }

    /// Whether any registered backend supports the secret type.
    pub fn supports(&self, secret_type: &str) -> bool {
        self.resolvers.iter().any(|r| r.supports(secret_type))
    }

    /// Resolve through the first supporting backend. Fails with
    /// [`GenerateError::UnsupportedSecret`] when no backend matches.
    pub fn resolve(&self, secret_type: &str, params: &SecretParams) -> Result<String> {
        let fingerprint = format!("{}:{}", secret_type, format_params(params));
        if let Some(cached) = self.cache.borrow().get(&fingerprint) {
            debug!(secret_type, "secret resolved from cache");
            return Ok(cached.clone());
        }

        for resolver in &self.resolvers {
            if resolver.supports(secret_type) {
                let value = resolver.resolve(secret_type, params)?;
                self.cache
                    .borrow_mut()
                    .insert(fingerprint, value.clone());
                return Ok(value);
            }
        }

        Err(GenerateError::UnsupportedSecret {
            secret_type: secret_type.to_string(),
            params: format_params(params),
        })
    }
}

impl Default for SecretResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
