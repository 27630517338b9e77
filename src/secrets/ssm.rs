//! AWS SSM Parameter Store backend.
//!
//! Placeholder form: `{{ssm.path(/app/password).aws_profile(dev)}}`, with an
//! optional `region_name(...)` segment. The parameter is fetched decrypted.

use super::{SecretParams, SecretResolver, format_params, require_param};
use crate::error::{GenerateError, Result};
use anyhow::{Context, bail};
use std::process::Command;

/// Region used when the placeholder carries no `region_name` segment.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Client capable of reading one decrypted SSM parameter.
///
/// Injected so tests can substitute a fake; the default implementation
/// shells out to the `aws` CLI with the requested profile.
pub trait SsmClient {
    fn get_parameter(&self, path: &str, profile: &str, region: &str) -> anyhow::Result<String>;
}

/// Default [`SsmClient`] backed by the `aws` CLI.
#[derive(Debug, Default)]
pub struct AwsCliSsm;

impl SsmClient for AwsCliSsm {
    fn get_parameter(&self, path: &str, profile: &str, region: &str) -> anyhow::Result<String> {
        let output = Command::new("aws")
            .args([
                "ssm",
                "get-parameter",
                "--name",
                path,
                "--with-decryption",
                "--region",
                region,
                "--query",
                "Parameter.Value",
                "--output",
                "text",
            ])
            .env("AWS_PROFILE", profile)
            .output()
            .context("failed to run 'aws ssm get-parameter'")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "error while trying to read SSM value for key: {} - {}",
                path,
                stderr.trim()
            );
        }

        let value = String::from_utf8_lossy(&output.stdout);
        Ok(value.trim_end_matches('\n').to_string())
    }
}

/// Secret backend for the `ssm` type token.
pub struct SsmSecretResolver {
    client: Box<dyn SsmClient>,
    default_aws_profile: Option<String>,
}

impl SsmSecretResolver {
    pub fn new(client: Box<dyn SsmClient>, default_aws_profile: Option<String>) -> Self {
        Self {
            client,
            default_aws_profile,
        }
    }
}

impl SecretResolver for SsmSecretResolver {
    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "ssm"
    }

    fn resolve(&self, _secret_type: &str, params: &SecretParams) -> Result<String> {
        let profile = params
            .get("aws_profile")
            .and_then(|v| v.as_deref())
            .or(self.default_aws_profile.as_deref())
            .ok_or_else(|| GenerateError::MissingSecretParam {
                key: "aws_profile".to_string(),
                params: format_params(params),
            })?;

        let path = require_param("path", params)?;
        let region = params
            .get("region_name")
            .and_then(|v| v.as_deref())
            .unwrap_or(DEFAULT_REGION);

        self.client
            .get_parameter(path, profile, region)
            .map_err(|source| GenerateError::SecretBackend {
                backend: "ssm".to_string(),
                key: path.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type RequestLog = Rc<RefCell<Vec<(String, String, String)>>>;

    struct FakeSsm {
        requests: RequestLog,
    }

    impl FakeSsm {
        fn with_log() -> (Box<Self>, RequestLog) {
            let log: RequestLog = Rc::new(RefCell::new(Vec::new()));
            (
                Box::new(Self {
                    requests: Rc::clone(&log),
                }),
                log,
            )
        }
    }

    impl SsmClient for FakeSsm {
        fn get_parameter(&self, path: &str, profile: &str, region: &str) -> anyhow::Result<String> {
            self.requests.borrow_mut().push((
                path.to_string(),
                profile.to_string(),
                region.to_string(),
            ));
            if path == "/denied" {
                bail!("AccessDeniedException");
            }
            Ok(format!("value-of-{}", path))
        }
    }

    fn params(pairs: &[(&str, Option<&str>)]) -> SecretParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_resolves_with_profile_and_default_region() {
        let (fake, log) = FakeSsm::with_log();
        let resolver = SsmSecretResolver::new(fake, None);
        let value = resolver
            .resolve(
                "ssm",
                &params(&[("path", Some("/foo")), ("aws_profile", Some("dev"))]),
            )
            .unwrap();
        assert_eq!(value, "value-of-/foo");
        assert_eq!(
            log.borrow().as_slice(),
            &[("/foo".into(), "dev".into(), DEFAULT_REGION.into())]
        );
    }

    #[test]
    fn test_region_override() {
        let (fake, log) = FakeSsm::with_log();
        let resolver = SsmSecretResolver::new(fake, Some("default-profile".into()));
        resolver
            .resolve(
                "ssm",
                &params(&[("path", Some("/foo")), ("region_name", Some("eu-west-1"))]),
            )
            .unwrap();
        assert_eq!(log.borrow()[0].2, "eu-west-1");
    }

    #[test]
    fn test_missing_profile_without_default_fails() {
        let (fake, _log) = FakeSsm::with_log();
        let resolver = SsmSecretResolver::new(fake, None);
        let err = resolver
            .resolve("ssm", &params(&[("path", Some("/foo"))]))
            .unwrap_err();
        assert!(matches!(err, GenerateError::MissingSecretParam { ref key, .. } if key == "aws_profile"));
    }

    #[test]
    fn test_default_profile_fills_in() {
        let (fake, log) = FakeSsm::with_log();
        let resolver = SsmSecretResolver::new(fake, Some("ops".into()));
        let value = resolver
            .resolve("ssm", &params(&[("path", Some("/foo"))]))
            .unwrap();
        assert_eq!(value, "value-of-/foo");
        assert_eq!(log.borrow()[0].1, "ops");
    }

    #[test]
    fn test_backend_failure_names_key() {
        let (fake, _log) = FakeSsm::with_log();
        let resolver = SsmSecretResolver::new(fake, Some("ops".into()));
        let err = resolver
            .resolve("ssm", &params(&[("path", Some("/denied"))]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/denied"));
        assert!(message.contains("ssm"));
    }
}
