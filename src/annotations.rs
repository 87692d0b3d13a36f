//! # Annotations
//!
//! Annotation keys understood by the webhook and the pure parser that turns
//! a pod's annotation map into a [`SecretManagerConfig`].
//!
//! The keys are a stable external contract. Parsing never fails: unknown
//! keys are ignored, absent strings stay empty and unparsable booleans are
//! `false`.

use std::collections::BTreeMap;

use crate::provider::{AwsConfig, GcpConfig, SecretManagerConfig, VaultConfig};

/// Restrict secret reference detection to `secret:` prefixed values
pub const EXPLICIT_SECRETS: &str = "secret.manager/explicit-secrets";

/// Use AWS Secrets Manager
pub const AWS_ENABLED: &str = "aws.secret.manager/enabled";
/// Region of the AWS Secrets Manager endpoint
pub const AWS_REGION: &str = "aws.secret.manager/region";
/// Role to assume before fetching the secret
pub const AWS_ROLE_ARN: &str = "aws.secret.manager/role-arn";
/// Name of the AWS secret to fetch
pub const AWS_SECRET_NAME: &str = "aws.secret.manager/secret-name";
/// Fetch the previous version of the secret (AWS keeps a single previous version)
pub const AWS_PREVIOUS_VERSION: &str = "aws.secret.manager/previous-version";

/// Use GCP Secret Manager
pub const GCP_ENABLED: &str = "gcp.secret.manager/enabled";
/// GCP project holding the secret
pub const GCP_PROJECT_ID: &str = "gcp.secret.manager/project-id";
/// Name of the GCP secret
pub const GCP_SECRET_NAME: &str = "gcp.secret.manager/secret-name";
/// Version of the GCP secret, latest when unset
pub const GCP_SECRET_VERSION: &str = "gcp.secret.manager/secret-version";
/// Kubernetes secret with a service account key allowed to read the GCP secret
pub const GCP_SERVICE_ACCOUNT_KEY_SECRET_NAME: &str =
    "gcp.secret.manager/gcp-service-account-key-secret-name";

/// Use HashiCorp Vault
pub const VAULT_ENABLED: &str = "vault.secret.manager/enabled";
/// Vault address including scheme and port, e.g. `https://vault.vault.svc:8200`
pub const VAULT_SERVICE: &str = "vault.secret.manager/service";
/// Mount path of the Kubernetes auth method
pub const VAULT_AUTH_PATH: &str = "vault.secret.manager/auth-path";
/// Secret path in Vault
pub const VAULT_SECRET_PATH: &str = "vault.secret.manager/path";
/// Role used to log in to Vault
pub const VAULT_ROLE: &str = "vault.secret.manager/role";
/// Vault auth backend, `kubernetes` (default) or `gcp`
pub const VAULT_BACKEND: &str = "vault.secret.manager/backend";
/// Alternate mount path of the Kubernetes auth backend
pub const VAULT_KUBERNETES_BACKEND: &str = "vault.secret.manager/kubernetes-backend";
/// Kubernetes secret with GCP service account credentials for the `gcp` backend
pub const VAULT_GCP_SERVICE_ACCOUNT_KEY_SECRET_NAME: &str =
    "vault.secret.manager/gcp-service-account-key-secret-name";
/// Kubernetes secret holding Vault's CA certificate
pub const VAULT_TLS_SECRET: &str = "vault.secret.manager/tls-secret";
/// File name of the CA certificate inside the TLS secret
pub const VAULT_CA_CERT: &str = "vault.secret.manager/ca-cert";
/// Talk to Vault without verifying its certificate
pub const VAULT_TLS_SKIP_VERIFY: &str = "vault.secret.manager/tls-skip-verify";
/// Override the service account token used for Vault authentication
pub const VAULT_K8S_TOKEN_PATH: &str = "vault.secret.manager/k8s-token-path";
/// Use secret names as keys when the path holds a tree of secrets
pub const VAULT_USE_SECRET_NAMES_AS_KEYS: &str = "vault.secret.manager/use-secret-names-as-keys";
/// Secret version, latest when unset
pub const VAULT_SECRET_VERSION: &str = "vault.secret.manager/secret-version";
/// Prefix of the numbered multi-secret annotations
///
/// `vault.secret.manager/secret-config-1: '{"path": "secrets/v2/plain/app", "version": "2"}'`
pub const VAULT_MULTI_SECRET_PREFIX: &str = "vault.secret.manager/secret-config-";

/// Default Vault auth backend
pub const DEFAULT_VAULT_BACKEND: &str = "kubernetes";

/// Build the secret manager configuration from pod annotations
#[must_use]
pub fn parse_secret_manager_config(annotations: &BTreeMap<String, String>) -> SecretManagerConfig {
    let get = |key: &str| annotations.get(key).cloned().unwrap_or_default();
    let flag = |key: &str| parse_bool(annotations.get(key).map(String::as_str));

    let aws = AwsConfig {
        enabled: flag(AWS_ENABLED),
        region: get(AWS_REGION),
        secret_name: get(AWS_SECRET_NAME),
        previous_version: get(AWS_PREVIOUS_VERSION),
        role_arn: get(AWS_ROLE_ARN),
    };

    let gcp = GcpConfig {
        enabled: flag(GCP_ENABLED),
        project_id: get(GCP_PROJECT_ID),
        secret_name: get(GCP_SECRET_NAME),
        secret_version: get(GCP_SECRET_VERSION),
        service_account_key_secret_name: get(GCP_SERVICE_ACCOUNT_KEY_SECRET_NAME),
    };

    let backend = match annotations.get(VAULT_BACKEND) {
        Some(backend) if !backend.is_empty() => backend.clone(),
        _ => DEFAULT_VAULT_BACKEND.to_string(),
    };

    let vault = VaultConfig {
        enabled: flag(VAULT_ENABLED),
        addr: get(VAULT_SERVICE),
        auth_path: get(VAULT_AUTH_PATH),
        path: get(VAULT_SECRET_PATH),
        role: get(VAULT_ROLE),
        token_path: get(VAULT_K8S_TOKEN_PATH),
        backend,
        kubernetes_backend: get(VAULT_KUBERNETES_BACKEND),
        use_secret_names_as_keys: flag(VAULT_USE_SECRET_NAMES_AS_KEYS),
        gcp_service_account_key_secret_name: get(VAULT_GCP_SERVICE_ACCOUNT_KEY_SECRET_NAME),
        tls_secret_name: get(VAULT_TLS_SECRET),
        ca_cert: get(VAULT_CA_CERT),
        tls_skip_verify: flag(VAULT_TLS_SKIP_VERIFY),
        version: get(VAULT_SECRET_VERSION),
        secret_configs: parse_secret_configs(annotations),
    };

    SecretManagerConfig {
        aws,
        gcp,
        vault,
        explicit_secrets: flag(EXPLICIT_SECRETS),
    }
}

/// Collect the numbered `secret-config-N` annotations ordered by `N`
///
/// Keys whose suffix is not a number are ignored. Values are kept verbatim,
/// the wrapper is the one that decodes them.
fn parse_secret_configs(annotations: &BTreeMap<String, String>) -> Vec<String> {
    let mut numbered: Vec<(u64, &String)> = annotations
        .iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix(VAULT_MULTI_SECRET_PREFIX)?;
            suffix.parse::<u64>().ok().map(|index| (index, value))
        })
        .collect();

    numbered.sort_by_key(|(index, _)| *index);
    numbered.into_iter().map(|(_, value)| value.clone()).collect()
}

/// Permissive boolean parsing, anything unrecognized is `false`
fn parse_bool(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "t" | "T" | "true" | "TRUE" | "True"))
}
