//! # HashiCorp Vault
//!
//! Vault is the richest backend: it always exports `VAULT_ADDR`, either
//! mounts the CA certificate or disables verification, optionally mounts
//! GCP credentials for the `gcp` auth backend and passes the ordered
//! multi-secret configs through to the wrapper untouched.

use k8s_openapi::api::core::v1::{Volume, VolumeMount};

use crate::annotations;
use crate::constants::{
    GOOGLE_CLOUD_KEY_VOLUME_NAME, VAULT_TLS_MOUNT_PATH, VAULT_TLS_VOLUME_NAME,
};
use crate::error::{InvalidAnnotationReason, MutationError};

use super::gcp::{google_application_credentials_path, google_cloud_key_mount};
use super::{env_var, push_flag, require, secret_volume, BackendKind, Contribution};

/// Auth backend value that switches Vault login to GCP
pub const GCP_AUTH_BACKEND: &str = "gcp";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultConfig {
    pub enabled: bool,
    pub addr: String,
    pub auth_path: String,
    pub path: String,
    pub role: String,
    pub token_path: String,
    pub backend: String,
    pub kubernetes_backend: String,
    pub use_secret_names_as_keys: bool,
    pub gcp_service_account_key_secret_name: String,
    pub tls_secret_name: String,
    /// CA certificate file name inside `tls_secret_name`
    pub ca_cert: String,
    pub tls_skip_verify: bool,
    pub version: String,
    /// Opaque JSON blobs from `secret-config-N`, ordered by `N`
    pub secret_configs: Vec<String>,
}

impl VaultConfig {
    /// Mount path of the CA certificate file
    #[must_use]
    pub fn ca_cert_path(&self) -> String {
        format!("{VAULT_TLS_MOUNT_PATH}/{}", self.ca_cert)
    }

    fn has_tls_material(&self) -> bool {
        !self.tls_secret_name.is_empty() && !self.ca_cert.is_empty()
    }

    /// `path` stays mandatory even when `secret_configs` carry their own paths.
    pub(crate) fn validate(&self) -> Result<(), MutationError> {
        require(
            &self.addr,
            BackendKind::Vault,
            "vault address",
            annotations::VAULT_SERVICE,
        )?;

        if !self.tls_skip_verify {
            require(
                &self.tls_secret_name,
                BackendKind::Vault,
                "vault TLS secret name",
                annotations::VAULT_TLS_SECRET,
            )?;
        }
        if !self.tls_secret_name.is_empty() && self.ca_cert.is_empty() {
            return Err(incomplete_pair(
                annotations::VAULT_TLS_SECRET,
                annotations::VAULT_CA_CERT,
            ));
        }
        if !self.ca_cert.is_empty() && self.tls_secret_name.is_empty() {
            return Err(incomplete_pair(
                annotations::VAULT_CA_CERT,
                annotations::VAULT_TLS_SECRET,
            ));
        }

        require(
            &self.path,
            BackendKind::Vault,
            "vault path",
            annotations::VAULT_SECRET_PATH,
        )?;
        require(
            &self.role,
            BackendKind::Vault,
            "vault role",
            annotations::VAULT_ROLE,
        )
    }

    pub(crate) fn contribution(&self) -> Contribution {
        let mut env = vec![env_var("VAULT_ADDR", self.addr.as_str())];
        let mut volume_mounts = Vec::new();

        if !self.gcp_service_account_key_secret_name.is_empty() {
            volume_mounts.push(google_cloud_key_mount());
        }

        if self.has_tls_material() {
            env.push(env_var("VAULT_CACERT", self.ca_cert_path()));
            volume_mounts.push(VolumeMount {
                name: VAULT_TLS_VOLUME_NAME.to_string(),
                mount_path: self.ca_cert_path(),
                sub_path: Some(self.ca_cert.clone()),
                ..Default::default()
            });
        } else {
            env.push(env_var("VAULT_SKIP_VERIFY", "true"));
        }

        Contribution {
            env,
            volume_mounts,
            args: self.args(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![BackendKind::Vault.as_str().to_string()];
        push_flag(&mut args, "role", &self.role);

        if self.backend == GCP_AUTH_BACKEND {
            push_flag(&mut args, "backend", GCP_AUTH_BACKEND);
            if !self.gcp_service_account_key_secret_name.is_empty() {
                push_flag(
                    &mut args,
                    "google-application-credentials",
                    &google_application_credentials_path(),
                );
            }
        }

        let kubernetes_backend = if self.kubernetes_backend.is_empty() {
            &self.auth_path
        } else {
            &self.kubernetes_backend
        };
        push_flag(&mut args, "kubernetes-backend", kubernetes_backend);
        push_flag(&mut args, "token-path", &self.token_path);

        for secret_config in &self.secret_configs {
            args.push(format!("--secret-config={secret_config}"));
        }

        push_flag(&mut args, "path", &self.path);
        if self.use_secret_names_as_keys {
            args.push("--names-as-keys".to_string());
        }
        push_flag(&mut args, "version", &self.version);
        args
    }

    pub(crate) fn volumes(&self) -> Vec<Volume> {
        let mut volumes = Vec::new();
        if !self.gcp_service_account_key_secret_name.is_empty() {
            volumes.push(secret_volume(
                GOOGLE_CLOUD_KEY_VOLUME_NAME,
                &self.gcp_service_account_key_secret_name,
            ));
        }
        if !self.tls_secret_name.is_empty() {
            volumes.push(secret_volume(VAULT_TLS_VOLUME_NAME, &self.tls_secret_name));
        }
        volumes
    }
}

fn incomplete_pair(present: &'static str, missing: &'static str) -> MutationError {
    MutationError::InvalidAnnotation {
        backend: BackendKind::Vault,
        reason: InvalidAnnotationReason::IncompletePair { present, missing },
    }
}
