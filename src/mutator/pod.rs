//! # Pod Mutator
//!
//! Runs the container mutator over `initContainers` and `containers`, then
//! adds the wrapper bootstrap init container and the support volumes once.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, Pod, ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_SECRETS_CONSUMER_ENV_IMAGE, DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY,
    INIT_CONTAINER_CPU_LIMIT, INIT_CONTAINER_MEMORY_LIMIT, INIT_CONTAINER_MOUNT_PATH,
    INIT_CONTAINER_NAME, INIT_CONTAINER_SOURCE_BINARY, STAGING_VOLUME_NAME,
};
use crate::error::MutationError;
use crate::kubernetes::ObjectLookup;
use crate::provider::SecretManagerConfig;
use crate::registry::{ImageRegistry, RequestCache};

use super::container::{ContainerMutation, ContainerMutator};

/// Image of the bootstrap init container that copies the wrapper binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitContainerSettings {
    pub image: String,
    pub image_pull_policy: String,
}

impl Default for InitContainerSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_SECRETS_CONSUMER_ENV_IMAGE.to_string(),
            image_pull_policy: DEFAULT_SECRETS_CONSUMER_ENV_IMAGE_PULL_POLICY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodMutation {
    pub pod: Pod,
    pub mutated: bool,
    /// Number of rewritten containers, init containers included
    pub containers_mutated: usize,
    pub secret_references: usize,
}

impl PodMutation {
    pub(crate) fn unchanged(pod: &Pod) -> Self {
        Self {
            pod: pod.clone(),
            mutated: false,
            containers_mutated: 0,
            secret_references: 0,
        }
    }
}

/// Mutate every container of `pod` for the active backend of `config`
///
/// # Errors
///
/// The first container failure aborts the whole pod, nothing is applied.
pub async fn mutate_pod(
    pod: &Pod,
    config: &SecretManagerConfig,
    lookup: &dyn ObjectLookup,
    registry: &dyn ImageRegistry,
    namespace: &str,
    init_container: &InitContainerSettings,
) -> Result<PodMutation, MutationError> {
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(PodMutation::unchanged(pod));
    };

    let registry = RequestCache::new(registry);
    let mutator = ContainerMutator {
        config,
        lookup,
        registry: &registry,
        namespace,
        pod_spec: spec,
    };

    let init_results = mutate_all(mutator, spec.init_containers.as_deref().unwrap_or_default()).await?;
    let init_mutated = init_results.iter().any(|r| r.mutated);
    if init_mutated {
        debug!(namespace, "Successfully mutated pod init containers");
    } else {
        debug!(namespace, "No pod init containers were mutated");
    }

    let container_results = mutate_all(mutator, &spec.containers).await?;
    let containers_mutated = container_results.iter().any(|r| r.mutated);
    if containers_mutated {
        debug!(namespace, "Successfully mutated pod containers");
    } else {
        debug!(namespace, "No pod containers were mutated");
    }

    let Some(backend) = config.active_backend() else {
        return Ok(PodMutation::unchanged(pod));
    };
    if !init_mutated && !containers_mutated {
        return Ok(PodMutation::unchanged(pod));
    }

    let count = |results: &[ContainerMutation]| results.iter().filter(|r| r.mutated).count();
    let references = |results: &[ContainerMutation]| {
        results
            .iter()
            .map(|r| r.secret_references.len())
            .sum::<usize>()
    };
    let containers_count = count(&init_results) + count(&container_results);
    let references_count = references(&init_results) + references(&container_results);

    let mut mutated_spec = spec.clone();

    let mut init_containers = vec![bootstrap_init_container(init_container)];
    init_containers.extend(init_results.into_iter().map(|r| r.container));
    mutated_spec.init_containers = Some(init_containers);
    mutated_spec.containers = container_results.into_iter().map(|r| r.container).collect();

    let volumes = mutated_spec.volumes.get_or_insert_with(Vec::new);
    for volume in std::iter::once(staging_volume()).chain(backend.volumes()) {
        if let Some(existing) = volumes.iter().find(|existing| existing.name == volume.name) {
            if volume_conflicts(existing, &volume) {
                warn!(
                    namespace,
                    volume = %volume.name,
                    "Pod declares a different volume under a support volume name, keeping the pod's volume"
                );
            } else {
                debug!(namespace, volume = %volume.name, "Volume already present, skipping");
            }
            continue;
        }
        debug!(namespace, volume = %volume.name, "Adding support volume");
        volumes.push(volume);
    }

    let mut mutated_pod = pod.clone();
    mutated_pod.spec = Some(mutated_spec);

    Ok(PodMutation {
        pod: mutated_pod,
        mutated: true,
        containers_mutated: containers_count,
        secret_references: references_count,
    })
}

/// Whether a same-named pod volume points somewhere else than the support volume
fn volume_conflicts(existing: &Volume, wanted: &Volume) -> bool {
    match (&existing.secret, &wanted.secret) {
        (Some(existing), Some(wanted)) => existing.secret_name != wanted.secret_name,
        (None, None) => existing.empty_dir.is_none() != wanted.empty_dir.is_none(),
        _ => true,
    }
}

/// Mutate a container group concurrently, results keep the input order
async fn mutate_all(
    mutator: ContainerMutator<'_>,
    containers: &[Container],
) -> Result<Vec<ContainerMutation>, MutationError> {
    try_join_all(containers.iter().map(|container| mutator.mutate(container))).await
}

fn bootstrap_init_container(settings: &InitContainerSettings) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        image_pull_policy: Some(settings.image_pull_policy.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp {INIT_CONTAINER_SOURCE_BINARY} {INIT_CONTAINER_MOUNT_PATH}"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: STAGING_VOLUME_NAME.to_string(),
            mount_path: INIT_CONTAINER_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(INIT_CONTAINER_CPU_LIMIT.to_string())),
                ("memory".to_string(), Quantity(INIT_CONTAINER_MEMORY_LIMIT.to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn staging_volume() -> Volume {
    Volume {
        name: STAGING_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::StaticObjectLookup;
    use crate::provider::{GcpConfig, VaultConfig};
    use crate::registry::StaticImageRegistry;
    use k8s_openapi::api::core::v1::{PodSpec, SecretVolumeSource};

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some("busybox".to_string()),
            command: Some(vec!["sh".to_string(), "-c".to_string(), "env".to_string()]),
            ..Default::default()
        }
    }

    fn pod(init: Vec<Container>, containers: Vec<Container>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                init_containers: if init.is_empty() { None } else { Some(init) },
                containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn vault_gcp_config() -> SecretManagerConfig {
        SecretManagerConfig {
            vault: VaultConfig {
                enabled: true,
                addr: "https://vault:8200".to_string(),
                path: "/secret/data/app".to_string(),
                role: "app".to_string(),
                backend: "gcp".to_string(),
                gcp_service_account_key_secret_name: "vault-sa".to_string(),
                tls_secret_name: "vault-tls-secret".to_string(),
                ca_cert: "ca.pem".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn run(pod: &Pod, config: &SecretManagerConfig) -> PodMutation {
        mutate_pod(
            pod,
            config,
            &StaticObjectLookup::new(),
            &StaticImageRegistry::new(),
            "default",
            &InitContainerSettings::default(),
        )
        .await
        .unwrap()
    }

    fn volume_names(mutation: &PodMutation) -> Vec<String> {
        mutation
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect()
    }

    #[tokio::test]
    async fn test_support_volumes_added_once_for_many_containers() {
        let pod = pod(
            vec![container("migrate")],
            vec![container("app"), container("sidecar"), container("worker")],
        );

        let mutation = run(&pod, &vault_gcp_config()).await;

        assert!(mutation.mutated);
        assert_eq!(mutation.containers_mutated, 4);
        assert_eq!(
            volume_names(&mutation),
            vec!["secrets-consumer-env", "google-cloud-key", "vault-tls"]
        );

        let spec = mutation.pod.spec.unwrap();
        let init_names: Vec<&str> = spec
            .init_containers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(init_names, vec!["copy-secrets-consumer-env", "migrate"]);
        assert!(spec
            .containers
            .iter()
            .all(|c| c.command == Some(vec!["/secrets-consumer/secrets-consumer-env".to_string()])));
    }

    #[test]
    fn test_bootstrap_init_container_shape() {
        let settings = InitContainerSettings {
            image: "registry.local/secrets-consumer-env:2.0.0".to_string(),
            image_pull_policy: "Always".to_string(),
        };
        let init = bootstrap_init_container(&settings);

        assert_eq!(init.image.as_deref(), Some("registry.local/secrets-consumer-env:2.0.0"));
        assert_eq!(init.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(
            init.command.unwrap(),
            vec!["sh", "-c", "cp /usr/local/bin/secrets-consumer-env /secrets-consumer/"]
        );
        let limits = init.resources.and_then(|r| r.limits).unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("50m".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("64Mi".to_string())));
    }

    #[tokio::test]
    async fn test_existing_volume_with_same_name_is_kept() {
        let mut pod = pod(vec![], vec![container("app")]);
        let user_volume = Volume {
            name: "google-cloud-key".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some("user-provided".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Some(spec) = pod.spec.as_mut() {
            spec.volumes = Some(vec![user_volume.clone()]);
        }
        let config = SecretManagerConfig {
            gcp: GcpConfig {
                enabled: true,
                project_id: "project-x".to_string(),
                secret_name: "s".to_string(),
                service_account_key_secret_name: "gcp-sa".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mutation = run(&pod, &config).await;

        let volumes = mutation.pod.spec.and_then(|s| s.volumes).unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0], user_volume);
        assert_eq!(volumes[1].name, "secrets-consumer-env");
    }

    #[test]
    fn test_volume_conflict_detection() {
        let secret = |name: &str| Volume {
            name: "google-cloud-key".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(!volume_conflicts(&secret("gcp-sa"), &secret("gcp-sa")));
        assert!(volume_conflicts(&secret("user-provided"), &secret("gcp-sa")));
        assert!(!volume_conflicts(&staging_volume(), &staging_volume()));

        let host_path = Volume {
            name: STAGING_VOLUME_NAME.to_string(),
            host_path: Some(k8s_openapi::api::core::v1::HostPathVolumeSource {
                path: "/opt/bin".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(volume_conflicts(&host_path, &staging_volume()));
    }

    #[tokio::test]
    async fn test_no_backend_returns_pod_unchanged() {
        let pod = pod(vec![container("init")], vec![container("app")]);

        let mutation = run(&pod, &SecretManagerConfig::default()).await;

        assert!(!mutation.mutated);
        assert_eq!(mutation.pod, pod);
    }

    #[tokio::test]
    async fn test_pod_without_spec_is_unchanged() {
        let pod = Pod::default();
        let mutation = run(&pod, &vault_gcp_config()).await;
        assert!(!mutation.mutated);
    }
}
