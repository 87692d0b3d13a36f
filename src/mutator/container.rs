//! # Container Mutator
//!
//! Rewrites one container so that it starts through the wrapper binary.

use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, VolumeMount};
use tracing::{debug, info};

use crate::constants::{ARGS_SEPARATOR, STAGING_MOUNT_PATH, STAGING_VOLUME_NAME, WRAPPER_BINARY_PATH};
use crate::error::MutationError;
use crate::kubernetes::ObjectLookup;
use crate::observability::metrics;
use crate::provider::SecretManagerConfig;
use crate::registry::ImageRegistry;

use super::references::collect_secret_references;

/// Outcome of mutating one container
///
/// `container` is either the untouched input or the fully rewritten copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMutation {
    pub container: Container,
    pub mutated: bool,
    /// Secret references found in the container environment
    pub secret_references: Vec<EnvVar>,
}

/// Per-request context shared by every container of a pod
#[derive(Clone, Copy)]
pub struct ContainerMutator<'a> {
    pub config: &'a SecretManagerConfig,
    pub lookup: &'a dyn ObjectLookup,
    pub registry: &'a dyn ImageRegistry,
    pub namespace: &'a str,
    pub pod_spec: &'a PodSpec,
}

impl std::fmt::Debug for ContainerMutator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerMutator")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContainerMutator<'_> {
    /// # Errors
    ///
    /// Lookup failures from reference detection and registry failures while
    /// resolving an implicit entrypoint.
    pub async fn mutate(&self, container: &Container) -> Result<ContainerMutation, MutationError> {
        let secret_references =
            collect_secret_references(self.lookup, self.config, self.namespace, container).await?;
        if !secret_references.is_empty() {
            debug!(
                container = %container.name,
                count = secret_references.len(),
                "Found secret references in container environment"
            );
            metrics::increment_secret_references_detected(secret_references.len());
        }

        let Some(backend) = self.config.active_backend() else {
            return Ok(ContainerMutation {
                container: container.clone(),
                mutated: false,
                secret_references,
            });
        };

        let original_args = self.original_args(container).await?;
        let contribution = backend.contribution();

        let mut mutated = container.clone();

        if !contribution.env.is_empty() {
            mutated
                .env
                .get_or_insert_with(Vec::new)
                .extend(contribution.env);
        }

        let mounts = mutated.volume_mounts.get_or_insert_with(Vec::new);
        mounts.extend(contribution.volume_mounts);
        mounts.push(VolumeMount {
            name: STAGING_VOLUME_NAME.to_string(),
            mount_path: STAGING_MOUNT_PATH.to_string(),
            ..Default::default()
        });

        let mut args = contribution.args;
        args.push(ARGS_SEPARATOR.to_string());
        args.extend(original_args);

        mutated.command = Some(vec![WRAPPER_BINARY_PATH.to_string()]);
        mutated.args = Some(args);

        debug!(container = %container.name, backend = %backend.kind(), "Container mutated");

        Ok(ContainerMutation {
            container: mutated,
            mutated: true,
            secret_references,
        })
    }

    /// The program and arguments the container runs today
    ///
    /// Without an explicit `command` the image entrypoint is used, plus the
    /// image `Cmd` when the container declares no `args` either.
    async fn original_args(&self, container: &Container) -> Result<Vec<String>, MutationError> {
        let command = container.command.clone().unwrap_or_default();
        let args = container.args.clone().unwrap_or_default();

        if !command.is_empty() {
            return Ok(command.into_iter().chain(args).collect());
        }

        let image_config = self
            .registry
            .get_image_config(self.namespace, container, self.pod_spec)
            .await
            .map_err(|source| MutationError::Registry {
                container: container.name.clone(),
                source,
            })?;

        info!(
            container = %container.name,
            image = container.image.as_deref().unwrap_or_default(),
            entrypoint = ?image_config.entrypoint,
            "No command declared, using image entrypoint"
        );

        let mut resolved = image_config.entrypoint;
        if args.is_empty() {
            resolved.extend(image_config.cmd);
        }
        resolved.extend(args);
        Ok(resolved)
    }
}
