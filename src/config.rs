//! # Webhook Configuration
//!
//! Process settings loaded from environment variables, with command-line
//! flags taking precedence for the listener and logging settings.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::constants::{
    DEFAULT_IMAGE_PLATFORM, DEFAULT_LISTEN_ADDRESS, DEFAULT_SECRETS_CONSUMER_ENV_IMAGE,
    DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY,
};
use crate::mutator::InitContainerSettings;
use crate::registry::RegistryOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("both TLS_CERT_FILE and TLS_PRIVATE_KEY_FILE must be set to serve HTTPS, only {0} is set")]
    IncompleteTls(&'static str),

    #[error("invalid listen address \"{address}\": {source}")]
    InvalidListenAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Webhook configuration
///
/// Environment variables are populated from the deployment manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Image of the init container that copies the wrapper binary
    pub secrets_consumer_env_image: String,
    pub secrets_consumer_env_image_pull_policy: String,
    /// Webhook listener, `:port` binds every interface
    pub listen_address: String,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_private_key_file: Option<PathBuf>,
    /// Separate listener for `/metrics`, served on the main listener when unset
    pub telemetry_listen_address: Option<String>,
    pub debug: bool,
    pub enable_json_log: bool,
    /// Accept invalid registry TLS certificates
    pub registry_skip_verify: bool,
    /// Platform picked from multi-arch image indexes
    pub default_image_platform: String,
    /// Registry hosts reached over plain HTTP
    pub registry_insecure_hosts: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secrets_consumer_env_image: DEFAULT_SECRETS_CONSUMER_ENV_IMAGE.to_string(),
            secrets_consumer_env_image_pull_policy: DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY
                .to_string(),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            tls_cert_file: None,
            tls_private_key_file: None,
            telemetry_listen_address: None,
            debug: false,
            enable_json_log: false,
            registry_skip_verify: false,
            default_image_platform: DEFAULT_IMAGE_PLATFORM.to_string(),
            registry_insecure_hosts: Vec::new(),
        }
    }
}

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(name = "secrets-consumer-webhook", version, about = "Mutating admission webhook injecting the secrets-consumer-env wrapper", long_about = None)]
pub struct Cli {
    /// Webhook listen address (overrides LISTEN_ADDRESS)
    #[arg(long)]
    pub listen_address: Option<String>,

    /// PEM certificate chain (overrides TLS_CERT_FILE)
    #[arg(long)]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key (overrides TLS_PRIVATE_KEY_FILE)
    #[arg(long)]
    pub tls_private_key_file: Option<PathBuf>,

    /// Separate listen address for metrics (overrides TELEMETRY_LISTEN_ADDRESS)
    #[arg(long)]
    pub telemetry_listen_address: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log as JSON
    #[arg(long)]
    pub json_log: bool,
}

impl WebhookConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            secrets_consumer_env_image: env_var_or_default_str(
                "SECRETS_CONSUMER_ENV_IMAGE",
                DEFAULT_SECRETS_CONSUMER_ENV_IMAGE,
            ),
            secrets_consumer_env_image_pull_policy: env_var_or_default_str(
                "SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY",
                DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY,
            ),
            listen_address: env_var_or_default_str("LISTEN_ADDRESS", DEFAULT_LISTEN_ADDRESS),
            tls_cert_file: env_var_non_empty("TLS_CERT_FILE").map(PathBuf::from),
            tls_private_key_file: env_var_non_empty("TLS_PRIVATE_KEY_FILE").map(PathBuf::from),
            telemetry_listen_address: env_var_non_empty("TELEMETRY_LISTEN_ADDRESS"),
            debug: env_var_or_default_bool("DEBUG", false),
            enable_json_log: env_var_or_default_bool("ENABLE_JSON_LOG", false),
            registry_skip_verify: env_var_or_default_bool("REGISTRY_SKIP_VERIFY", false),
            default_image_platform: env_var_or_default_str(
                "DEFAULT_IMAGE_PLATFORM",
                DEFAULT_IMAGE_PLATFORM,
            ),
            registry_insecure_hosts: env_var_non_empty("REGISTRY_INSECURE_HOSTS")
                .map(|hosts| parse_host_list(&hosts))
                .unwrap_or_default(),
        }
    }

    /// Apply command-line overrides
    #[must_use]
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(listen_address) = cli.listen_address {
            self.listen_address = listen_address;
        }
        if cli.tls_cert_file.is_some() {
            self.tls_cert_file = cli.tls_cert_file;
        }
        if cli.tls_private_key_file.is_some() {
            self.tls_private_key_file = cli.tls_private_key_file;
        }
        if cli.telemetry_listen_address.is_some() {
            self.telemetry_listen_address = cli.telemetry_listen_address;
        }
        self.debug |= cli.debug;
        self.enable_json_log |= cli.json_log;
        self
    }

    /// Certificate and key paths when HTTPS is configured
    ///
    /// # Errors
    ///
    /// [`ConfigError::IncompleteTls`] when only one of the two files is set.
    pub fn tls_files(&self) -> Result<Option<(PathBuf, PathBuf)>, ConfigError> {
        match (&self.tls_cert_file, &self.tls_private_key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (Some(_), None) => Err(ConfigError::IncompleteTls("TLS_CERT_FILE")),
            (None, Some(_)) => Err(ConfigError::IncompleteTls("TLS_PRIVATE_KEY_FILE")),
            (None, None) => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Unparsable `listen_address`.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_listen_address(&self.listen_address)
    }

    /// # Errors
    ///
    /// Unparsable `telemetry_listen_address`.
    pub fn telemetry_socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.telemetry_listen_address
            .as_deref()
            .map(parse_listen_address)
            .transpose()
    }

    #[must_use]
    pub fn init_container_settings(&self) -> InitContainerSettings {
        InitContainerSettings {
            image: self.secrets_consumer_env_image.clone(),
            image_pull_policy: self.secrets_consumer_env_image_pull_policy.clone(),
        }
    }

    /// Registry client settings
    #[must_use]
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            platform: self.default_image_platform.clone(),
            skip_verify: self.registry_skip_verify,
            insecure_registries: self.registry_insecure_hosts.iter().cloned().collect(),
            ..Default::default()
        }
    }
}

/// Comma separated hosts, blanks dropped
fn parse_host_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse `host:port`, a bare `:port` binds every interface
fn parse_listen_address(address: &str) -> Result<SocketAddr, ConfigError> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    };
    full.parse()
        .map_err(|source| ConfigError::InvalidListenAddress {
            address: address.to_string(),
            source,
        })
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
