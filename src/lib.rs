//! Secrets Consumer Webhook Library
//!
//! Mutation engine of the secrets-consumer admission webhook. Pods annotated
//! for AWS Secrets Manager, GCP Secret Manager or Vault get an init container
//! staging the `secrets-consumer-env` wrapper, and every container is
//! rewritten to start through it.

pub mod annotations;
pub mod config;
pub mod constants;
pub mod error;
pub mod kubernetes;
pub mod mutator;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod server;
pub mod webhook;

pub use annotations::parse_secret_manager_config;
pub use error::{LookupError, MutationError, RegistryError};
pub use provider::{Backend, BackendKind, SecretManagerConfig};
pub use mutator::{mutate_pod, InitContainerSettings, PodMutation};
pub use webhook::{secrets_mutator, WebhookState};
