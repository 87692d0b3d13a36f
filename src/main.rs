//! # Secrets Consumer Webhook
//!
//! A Kubernetes mutating admission webhook that makes pods fetch their
//! secrets at start.
//!
//! ## Overview
//!
//! Pods annotated for a secret manager backend are rewritten so that:
//!
//! 1. **An init container** copies the `secrets-consumer-env` wrapper into a
//!    shared in-memory volume
//! 2. **Every container** starts through the wrapper, which fetches the
//!    secrets from AWS Secrets Manager, GCP Secret Manager or Vault and then
//!    `exec`s the original command
//! 3. **Implicit entrypoints** of containers without a `command` are read
//!    from the image registry
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for the annotation reference.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tracing::info;

use secrets_consumer_webhook::config::{Cli, WebhookConfig};
use secrets_consumer_webhook::kubernetes::{KubeObjectLookup, ObjectLookup};
use secrets_consumer_webhook::observability::metrics;
use secrets_consumer_webhook::registry::RegistryClient;
use secrets_consumer_webhook::server::start_server;
use secrets_consumer_webhook::webhook::WebhookState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = WebhookConfig::from_env().with_cli(Cli::parse());

    // Configure rustls crypto provider (ring) before any TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    init_tracing(&config);

    info!("Starting Secrets Consumer Webhook");
    info!(
        "Build info: version={}, built={}, commit={}",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let lookup: Arc<dyn ObjectLookup> = Arc::new(KubeObjectLookup::new(client));

    let registry = RegistryClient::new(Arc::clone(&lookup), config.registry_options())
        .context("Failed to create registry client")?;

    let state = Arc::new(WebhookState {
        lookup,
        registry: Arc::new(registry),
        init_container: config.init_container_settings(),
    });

    info!(
        image = %config.secrets_consumer_env_image,
        pull_policy = %config.secrets_consumer_env_image_pull_policy,
        platform = %config.default_image_platform,
        "Webhook configured"
    );

    start_server(&config, state).await
}

fn init_tracing(config: &WebhookConfig) {
    let default_directive = if config.debug {
        "secrets_consumer_webhook=debug"
    } else {
        "secrets_consumer_webhook=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive.into());

    if config.enable_json_log {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
