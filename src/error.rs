//! Error types for configuration generation.
//!
//! Every error aborts the whole generation run; there is no partial-success
//! mode. Variants carry enough context (path segments, the literal
//! placeholder, the backend name) to diagnose a failure from the message
//! alone.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by a generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The target path has no discoverable layers.
    #[error("no configuration layers discovered for '{0}'")]
    Hierarchy(String),

    /// The target path holds several compositions where one was required.
    #[error("'{path}' contains multiple compositions ({found}); append composition=<name> to select one")]
    AmbiguousComposition { path: String, found: String },

    /// Attempted to merge a value with no defined merge policy.
    #[error("no merge policy for tagged value '!{tag}' under key '{key}'")]
    MergeType { key: String, tag: String },

    /// A YAML layer failed to parse.
    #[error("failed to parse layer '{path}': {source}")]
    Layer {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// No registered backend supports the requested secret type.
    #[error("could not resolve secret type '{secret_type}' with params {params}")]
    UnsupportedSecret { secret_type: String, params: String },

    /// A secret expression is missing a required parameter.
    #[error("could not find required key '{key}' in the secret params: {params}")]
    MissingSecretParam { key: String, params: String },

    /// A secret backend call failed (auth, not-found, transport).
    #[error("secret backend '{backend}' failed for '{key}': {source}")]
    SecretBackend {
        backend: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A remote-state entry is malformed or its fetch failed.
    /// Not-found lookups are treated as empty results, not errors.
    #[error("remote state '{name}' could not be retrieved: {source}")]
    RemoteState {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Unresolved placeholders remain after resolution (strict mode).
    #[error("interpolations could not be resolved and strict validation was enabled:\n{0}")]
    Validation(String),

    /// Unknown output format token.
    #[error("unknown output format: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for generation operations.
pub type Result<T> = std::result::Result<T, GenerateError>;
