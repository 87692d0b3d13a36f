//! # Webhook
//!
//! Admission-time decision for pods and the axum handler serving it.
//!
//! A pod without an enabled backend is allowed unchanged. With a backend
//! its annotations are validated first, a configuration error stops the
//! chain and the pod is denied. Otherwise every container is rewritten and
//! the handler answers with a JSON patch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::annotations::parse_secret_manager_config;
use crate::error::MutationError;
use crate::kubernetes::ObjectLookup;
use crate::mutator::{mutate_pod, InitContainerSettings, PodMutation};
use crate::observability::metrics;
use crate::registry::ImageRegistry;

pub mod pods;

pub use pods::mutate_pods_handler;

/// Collaborators shared by every admission request
#[derive(Clone)]
pub struct WebhookState {
    pub lookup: Arc<dyn ObjectLookup>,
    pub registry: Arc<dyn ImageRegistry>,
    pub init_container: InitContainerSettings,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("init_container", &self.init_container)
            .finish_non_exhaustive()
    }
}

/// Decide and apply the mutation of one pod
///
/// # Errors
///
/// Configuration errors ([`MutationError::stops_chain`]) and request-fatal
/// lookup or registry failures.
pub async fn secrets_mutator(
    state: &WebhookState,
    pod: &Pod,
    namespace: &str,
) -> Result<PodMutation, MutationError> {
    let empty = BTreeMap::new();
    let annotations = pod.metadata.annotations.as_ref().unwrap_or(&empty);
    let config = parse_secret_manager_config(annotations);

    let enabled = config.enabled_backends();
    let Some(backend) = config.active_backend() else {
        return Ok(PodMutation::unchanged(pod));
    };
    if enabled.len() > 1 {
        warn!(
            namespace,
            enabled = ?enabled,
            selected = %backend.kind(),
            "Multiple secret manager backends enabled, using the first one"
        );
    }

    backend.validate()?;

    info!(namespace, backend = %backend.kind(), "Mutating pod");

    let started = Instant::now();
    let result = mutate_pod(
        pod,
        &config,
        state.lookup.as_ref(),
        state.registry.as_ref(),
        namespace,
        &state.init_container,
    )
    .await;
    metrics::observe_mutation_duration(started.elapsed().as_secs_f64());

    let mutation = result?;
    if mutation.mutated {
        metrics::increment_pods_mutated(backend.kind().as_str());
        metrics::increment_containers_mutated(backend.kind().as_str(), mutation.containers_mutated);
    }
    Ok(mutation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{VAULT_ENABLED, VAULT_ROLE, VAULT_SECRET_PATH, VAULT_SERVICE, VAULT_TLS_SKIP_VERIFY};
    use crate::kubernetes::StaticObjectLookup;
    use crate::registry::StaticImageRegistry;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use kube::api::ObjectMeta;

    fn state() -> WebhookState {
        WebhookState {
            lookup: Arc::new(StaticObjectLookup::new()),
            registry: Arc::new(StaticImageRegistry::new()),
            init_container: InitContainerSettings::default(),
        }
    }

    fn pod(annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    image: Some("busybox".to_string()),
                    command: Some(vec!["env".to_string()]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_vault_role_stops_chain() {
        let pod = pod(&[
            (VAULT_ENABLED, "true"),
            (VAULT_SERVICE, "https://vault:8200"),
            (VAULT_TLS_SKIP_VERIFY, "true"),
            (VAULT_SECRET_PATH, "/secret/data/app"),
        ]);

        let err = secrets_mutator(&state(), &pod, "default").await.unwrap_err();

        assert!(err.stops_chain());
        assert!(err.to_string().contains(VAULT_ROLE));
    }

    #[tokio::test]
    async fn test_valid_vault_pod_is_mutated() {
        let pod = pod(&[
            (VAULT_ENABLED, "true"),
            (VAULT_SERVICE, "https://vault:8200"),
            (VAULT_TLS_SKIP_VERIFY, "true"),
            (VAULT_SECRET_PATH, "/secret/data/app"),
            (VAULT_ROLE, "app"),
        ]);

        let mutation = secrets_mutator(&state(), &pod, "default").await.unwrap();

        assert!(mutation.mutated);
        assert_eq!(mutation.containers_mutated, 1);
    }

    #[tokio::test]
    async fn test_pod_without_annotations_is_unchanged() {
        let mut pod = pod(&[]);
        pod.metadata.annotations = None;

        let mutation = secrets_mutator(&state(), &pod, "default").await.unwrap();

        assert!(!mutation.mutated);
        assert_eq!(mutation.pod, pod);
    }
}
