//! # Provider Modules
//!
//! Backend configuration model and strategies for the supported secret
//! managers (AWS Secrets Manager, GCP Secret Manager, HashiCorp Vault).
//!
//! Exactly one backend is ever active per pod. [`SecretManagerConfig`]
//! picks it in the order AWS, GCP, Vault (first enabled wins) and exposes
//! it as a [`Backend`] which every caller dispatches on explicitly.

use std::fmt;

use k8s_openapi::api::core::v1::{EnvVar, SecretVolumeSource, Volume, VolumeMount};

use crate::constants::{ESCAPED_SECRET_PREFIX, SECRET_PREFIX, VAULT_PREFIX};
use crate::error::MutationError;

pub mod aws;
pub mod gcp;
pub mod vault;

pub use aws::AwsConfig;
pub use gcp::GcpConfig;
pub use vault::VaultConfig;

/// Discriminant of the supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Aws,
    Gcp,
    Vault,
}

impl BackendKind {
    /// Wrapper sub-command selecting this backend
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Aws => "aws",
            BackendKind::Gcp => "gcp",
            BackendKind::Vault => "vault",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated configuration for one admission request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretManagerConfig {
    pub aws: AwsConfig,
    pub gcp: GcpConfig,
    pub vault: VaultConfig,
    /// Only treat `secret:` prefixed values as secret references
    pub explicit_secrets: bool,
}

impl SecretManagerConfig {
    /// Every backend whose `enabled` annotation is set, in precedence order
    #[must_use]
    pub fn enabled_backends(&self) -> Vec<BackendKind> {
        let mut enabled = Vec::new();
        if self.aws.enabled {
            enabled.push(BackendKind::Aws);
        }
        if self.gcp.enabled {
            enabled.push(BackendKind::Gcp);
        }
        if self.vault.enabled {
            enabled.push(BackendKind::Vault);
        }
        enabled
    }

    /// The backend used for this pod, if any
    #[must_use]
    pub fn active_backend(&self) -> Option<Backend<'_>> {
        if self.aws.enabled {
            Some(Backend::Aws(&self.aws))
        } else if self.gcp.enabled {
            Some(Backend::Gcp(&self.gcp))
        } else if self.vault.enabled {
            Some(Backend::Vault(&self.vault))
        } else {
            None
        }
    }

    /// Value prefixes that mark an environment value as a secret reference
    #[must_use]
    pub fn secret_prefixes(&self) -> &'static [&'static str] {
        if self.explicit_secrets {
            &[SECRET_PREFIX, ESCAPED_SECRET_PREFIX]
        } else {
            &[VAULT_PREFIX, SECRET_PREFIX, ESCAPED_SECRET_PREFIX]
        }
    }

    /// Whether `value` carries one of the recognized secret prefixes
    #[must_use]
    pub fn has_secret_prefix(&self, value: &str) -> bool {
        self.secret_prefixes()
            .iter()
            .any(|prefix| value.starts_with(prefix))
    }
}

/// Additions a backend makes to a single container
///
/// `args` holds the wrapper sub-command and its flags, the `--` separator is
/// added by the container mutator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contribution {
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
    pub args: Vec<String>,
}

/// The single active backend of a pod
#[derive(Debug, Clone, Copy)]
pub enum Backend<'a> {
    Aws(&'a AwsConfig),
    Gcp(&'a GcpConfig),
    Vault(&'a VaultConfig),
}

impl Backend<'_> {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Aws(_) => BackendKind::Aws,
            Backend::Gcp(_) => BackendKind::Gcp,
            Backend::Vault(_) => BackendKind::Vault,
        }
    }

    /// Check that every field the backend needs is present
    ///
    /// # Errors
    ///
    /// Returns the first missing or inconsistent annotation.
    pub fn validate(&self) -> Result<(), MutationError> {
        match self {
            Backend::Aws(config) => config.validate(),
            Backend::Gcp(config) => config.validate(),
            Backend::Vault(config) => config.validate(),
        }
    }

    /// Environment, mounts and wrapper flags for one container
    #[must_use]
    pub fn contribution(&self) -> Contribution {
        match self {
            Backend::Aws(config) => config.contribution(),
            Backend::Gcp(config) => config.contribution(),
            Backend::Vault(config) => config.contribution(),
        }
    }

    /// Pod-level secret volumes backing this backend's mounts
    #[must_use]
    pub fn volumes(&self) -> Vec<Volume> {
        match self {
            Backend::Aws(_) => Vec::new(),
            Backend::Gcp(config) => config.volumes(),
            Backend::Vault(config) => config.volumes(),
        }
    }
}

pub(crate) fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub(crate) fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Push `--{flag}={value}` when `value` is non-empty
pub(crate) fn push_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    if !value.is_empty() {
        args.push(format!("--{flag}={value}"));
    }
}

/// Fail with a configuration error when `value` is empty
pub(crate) fn require(
    value: &str,
    backend: BackendKind,
    field: &'static str,
    annotation: &'static str,
) -> Result<(), MutationError> {
    if value.is_empty() {
        return Err(MutationError::MissingAnnotation {
            backend,
            field,
            annotation,
        });
    }
    Ok(())
}
