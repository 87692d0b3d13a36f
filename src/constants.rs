//! # Constants
//!
//! Fixed paths, volume names and defaults shared by the mutation engine.
//!
//! Volume names and mount paths are part of the contract with the
//! `secrets-consumer-env` wrapper image, so they live here rather than in
//! the individual backend strategies.

/// Absolute path of the wrapper binary inside mutated containers
pub const WRAPPER_BINARY_PATH: &str = "/secrets-consumer/secrets-consumer-env";

/// Mount path of the staging volume inside mutated containers
pub const STAGING_MOUNT_PATH: &str = "/secrets-consumer";

/// Name of the memory-backed staging volume
pub const STAGING_VOLUME_NAME: &str = "secrets-consumer-env";

/// Name of the injected init container that copies the wrapper binary
pub const INIT_CONTAINER_NAME: &str = "copy-secrets-consumer-env";

/// Mount path of the staging volume inside the init container
pub const INIT_CONTAINER_MOUNT_PATH: &str = "/secrets-consumer/";

/// Location of the wrapper binary inside the wrapper image
pub const INIT_CONTAINER_SOURCE_BINARY: &str = "/usr/local/bin/secrets-consumer-env";

/// CPU limit of the injected init container
pub const INIT_CONTAINER_CPU_LIMIT: &str = "50m";

/// Memory limit of the injected init container
pub const INIT_CONTAINER_MEMORY_LIMIT: &str = "64Mi";

/// Name of the secret volume holding a GCP service account key
pub const GOOGLE_CLOUD_KEY_VOLUME_NAME: &str = "google-cloud-key";

/// Directory the GCP service account key secret is mounted at
pub const GOOGLE_CLOUD_KEY_MOUNT_PATH: &str = "/var/run/secret/cloud.google.com";

/// File name of the service account key inside the GCP credential secret
pub const GCP_SERVICE_ACCOUNT_CREDENTIALS_FILE_NAME: &str = "service-account.json";

/// Name of the secret volume holding the Vault CA certificate
pub const VAULT_TLS_VOLUME_NAME: &str = "vault-tls";

/// Directory the Vault CA certificate is mounted under
pub const VAULT_TLS_MOUNT_PATH: &str = "/etc/tls";

/// Separator between wrapper flags and the wrapped program's arguments
pub const ARGS_SEPARATOR: &str = "--";

/// Recognized secret-value prefixes
pub const VAULT_PREFIX: &str = "vault:";
pub const SECRET_PREFIX: &str = "secret:";
pub const ESCAPED_SECRET_PREFIX: &str = ">>secret:";

/// Default wrapper image used by the init container
pub const DEFAULT_SECRETS_CONSUMER_ENV_IMAGE: &str = "innovia/secrets-consumer-env:1.0.0";

/// Default pull policy for the wrapper image
pub const DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Default webhook listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = ":8443";

/// Default platform picked from multi-arch image indexes
pub const DEFAULT_IMAGE_PLATFORM: &str = "linux/amd64";

/// Default registry used for image references without a registry host
pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

/// Namespace used when an admission request carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Timeout for a single registry HTTP request (seconds)
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 10;
