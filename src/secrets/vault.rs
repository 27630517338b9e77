//! Vault KV v2 backend.
//!
//! Placeholder form once implemented:
//! `{{vault.kv2.path(team/app/secret).field(Key)}}`.

use super::{SecretParams, SecretResolver, format_params};
use crate::error::{GenerateError, Result};

/// Interface-complete stub for Vault KV v2.
///
/// `supports` returns false unconditionally so the resolution chain degrades
/// gracefully: vault placeholders are left in place and surface through the
/// validator instead of a confusing backend error.
// TODO: implement KV v2 reads once a vault client is wired in.
pub struct VaultKv2SecretResolver;

impl SecretResolver for VaultKv2SecretResolver {
    fn supports(&self, _secret_type: &str) -> bool {
        false
    }

    fn resolve(&self, secret_type: &str, params: &SecretParams) -> Result<String> {
        Err(GenerateError::UnsupportedSecret {
            secret_type: secret_type.to_string(),
            params: format_params(params),
        })
    }
}
