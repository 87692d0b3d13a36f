//! # Pod Mutation Tests
//!
//! End-to-end checks of the pod mutation through the public API, using the
//! in-memory ConfigMap/Secret lookup and image registry.
//!
//! These tests verify:
//! - Pods without an enabled backend are returned unchanged
//! - Wrapper arguments per backend and the `--` separator
//! - Init container and support volumes are added exactly once
//! - Implicit image entrypoints are resolved from the registry
//! - Configuration and lookup errors deny the pod

mod common;

use common::{container, env, pod, spec, state};
use k8s_openapi::api::core::v1::{ConfigMapEnvSource, EnvFromSource, Volume};
use secrets_consumer_webhook::annotations::*;
use secrets_consumer_webhook::constants::{
    GOOGLE_CLOUD_KEY_VOLUME_NAME, INIT_CONTAINER_NAME, STAGING_VOLUME_NAME, WRAPPER_BINARY_PATH,
};
use secrets_consumer_webhook::kubernetes::StaticObjectLookup;
use secrets_consumer_webhook::registry::StaticImageRegistry;
use secrets_consumer_webhook::webhook::secrets_mutator;
use secrets_consumer_webhook::MutationError;

const AWS: &[(&str, &str)] = &[
    (AWS_ENABLED, "true"),
    (AWS_REGION, "us-east-1"),
    (AWS_SECRET_NAME, "orders/prod"),
];

fn volume_names(volumes: Option<&Vec<Volume>>) -> Vec<&str> {
    volumes
        .map(|v| v.iter().map(|volume| volume.name.as_str()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_pod_without_backend_is_identity() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        &[(VAULT_SERVICE, "https://vault:8200"), (AWS_ENABLED, "no")],
        vec![container("app", "nginx", &["nginx"], &["-g", "daemon off;"])],
    );

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();

    assert!(!mutation.mutated);
    assert_eq!(mutation.containers_mutated, 0);
    assert_eq!(mutation.pod, original);
}

#[tokio::test]
async fn test_aws_container_runs_through_wrapper() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        AWS,
        vec![container("app", "nginx", &["nginx"], &["-g", "daemon off;"])],
    );

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let app = &spec(&mutation.pod).containers[0];

    assert!(mutation.mutated);
    assert_eq!(app.command, Some(vec![WRAPPER_BINARY_PATH.to_string()]));
    assert_eq!(
        app.args.clone().unwrap(),
        vec![
            "aws",
            "--region=us-east-1",
            "--secret-name=orders/prod",
            "--",
            "nginx",
            "-g",
            "daemon off;",
        ]
    );
    let mounts = app.volume_mounts.clone().unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].name, STAGING_VOLUME_NAME);
}

#[tokio::test]
async fn test_init_container_and_staging_volume_added_once() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        AWS,
        vec![
            container("app", "nginx", &["nginx"], &[]),
            container("sidecar", "envoy", &["envoy"], &["-c", "/etc/envoy.yaml"]),
        ],
    );

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let spec = spec(&mutation.pod);

    assert_eq!(mutation.containers_mutated, 2);
    let init = spec.init_containers.clone().unwrap();
    assert_eq!(init.len(), 1);
    assert_eq!(init[0].name, INIT_CONTAINER_NAME);
    assert_eq!(volume_names(spec.volumes.as_ref()), vec![STAGING_VOLUME_NAME]);
    assert!(spec
        .containers
        .iter()
        .all(|c| c.command == Some(vec![WRAPPER_BINARY_PATH.to_string()])));
}

#[tokio::test]
async fn test_gcp_service_account_key_mounted_once() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        &[
            (GCP_ENABLED, "true"),
            (GCP_PROJECT_ID, "billing-prod"),
            (GCP_SECRET_NAME, "invoices"),
            (GCP_SERVICE_ACCOUNT_KEY_SECRET_NAME, "gcp-sa"),
        ],
        vec![
            container("app", "python", &["python", "main.py"], &[]),
            container("worker", "python", &["python", "worker.py"], &[]),
        ],
    );

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let spec = spec(&mutation.pod);

    assert_eq!(
        volume_names(spec.volumes.as_ref()),
        vec![STAGING_VOLUME_NAME, GOOGLE_CLOUD_KEY_VOLUME_NAME]
    );
    for c in &spec.containers {
        assert!(c.args.clone().unwrap().contains(
            &"--google-application-credentials=/var/run/secret/cloud.google.com/service-account.json"
                .to_string()
        ));
    }
}

#[tokio::test]
async fn test_vault_multi_secret_configs_keep_numeric_order() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        &[
            (VAULT_ENABLED, "true"),
            (VAULT_SERVICE, "https://vault.vault:8200"),
            (VAULT_TLS_SKIP_VERIFY, "true"),
            (VAULT_SECRET_PATH, "secret/data/app"),
            (VAULT_ROLE, "app"),
            ("vault.secret.manager/secret-config-10", r#"{"path":"secret/data/ten"}"#),
            ("vault.secret.manager/secret-config-2", r#"{"path":"secret/data/two"}"#),
        ],
        vec![container("app", "alpine", &["env"], &[])],
    );

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let args = spec(&mutation.pod).containers[0].args.clone().unwrap();

    let configs: Vec<&String> = args
        .iter()
        .filter(|arg| arg.starts_with("--secret-config="))
        .collect();
    assert_eq!(
        configs,
        vec![
            r#"--secret-config={"path":"secret/data/two"}"#,
            r#"--secret-config={"path":"secret/data/ten"}"#,
        ]
    );
    assert_eq!(args.last().map(String::as_str), Some("env"));

    let env = spec(&mutation.pod).containers[0].env.clone().unwrap();
    assert!(env.contains(&common::env("VAULT_ADDR", "https://vault.vault:8200")));
    assert!(env.contains(&common::env("VAULT_SKIP_VERIFY", "true")));
}

#[tokio::test]
async fn test_missing_command_uses_image_entrypoint_and_cmd() {
    let registry = StaticImageRegistry::new().with_image(
        "ghcr.io/acme/api:1.4",
        &["/docker-entrypoint.sh"],
        &["serve", "--port=8080"],
    );
    let state = state(StaticObjectLookup::new(), registry);
    let original = pod(AWS, vec![container("api", "ghcr.io/acme/api:1.4", &[], &[])]);

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let args = spec(&mutation.pod).containers[0].args.clone().unwrap();

    assert_eq!(
        args[args.len() - 4..],
        ["--", "/docker-entrypoint.sh", "serve", "--port=8080"]
    );
}

#[tokio::test]
async fn test_declared_args_replace_image_cmd() {
    let registry =
        StaticImageRegistry::new().with_image("ghcr.io/acme/api:1.4", &["/bin/api"], &["serve"]);
    let state = state(StaticObjectLookup::new(), registry);
    let original = pod(AWS, vec![container("api", "ghcr.io/acme/api:1.4", &[], &["migrate"])]);

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let args = spec(&mutation.pod).containers[0].args.clone().unwrap();

    assert_eq!(args[args.len() - 3..], ["--", "/bin/api", "migrate"]);
}

#[tokio::test]
async fn test_unresolvable_image_denies_pod() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(AWS, vec![container("api", "ghcr.io/acme/unknown:1", &[], &[])]);

    let err = secrets_mutator(&state, &original, "apps").await.unwrap_err();

    assert!(matches!(err, MutationError::Registry { ref container, .. } if container == "api"));
    assert!(!err.stops_chain());
}

#[tokio::test]
async fn test_missing_required_annotation_stops_chain() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let original = pod(
        &[(GCP_ENABLED, "true"), (GCP_SECRET_NAME, "invoices")],
        vec![container("app", "python", &["python"], &[])],
    );

    let err = secrets_mutator(&state, &original, "apps").await.unwrap_err();

    assert!(err.stops_chain());
    assert!(err.to_string().contains(GCP_PROJECT_ID));
}

#[tokio::test]
async fn test_optional_env_from_missing_is_ignored() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let mut app = container("app", "nginx", &["nginx"], &[]);
    app.env = Some(vec![env("DB_PASSWORD", "vault:secret/data/db#password")]);
    app.env_from = Some(vec![EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: "not-there".to_string(),
            optional: Some(true),
        }),
        ..Default::default()
    }]);
    let original = pod(AWS, vec![app]);

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();

    assert!(mutation.mutated);
    assert_eq!(mutation.secret_references, 1);
}

#[tokio::test]
async fn test_mandatory_env_from_missing_denies_pod() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let mut app = container("app", "nginx", &["nginx"], &[]);
    app.env_from = Some(vec![EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: "not-there".to_string(),
            optional: None,
        }),
        ..Default::default()
    }]);
    let original = pod(AWS, vec![app]);

    let err = secrets_mutator(&state, &original, "apps").await.unwrap_err();

    assert!(matches!(err, MutationError::Lookup(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn test_env_from_references_are_counted() {
    let lookup = StaticObjectLookup::new().with_config_map(
        "apps",
        "app-env",
        &[
            ("API_TOKEN", "secret:orders/prod#token"),
            ("LOG_LEVEL", "info"),
        ],
    );
    let state = state(lookup, StaticImageRegistry::new());
    let mut app = container("app", "nginx", &["nginx"], &[]);
    app.env_from = Some(vec![EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: "app-env".to_string(),
            optional: None,
        }),
        ..Default::default()
    }]);
    let original = pod(AWS, vec![app]);

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();

    assert_eq!(mutation.secret_references, 1);
}

#[tokio::test]
async fn test_init_containers_are_mutated_after_bootstrap() {
    let state = state(StaticObjectLookup::new(), StaticImageRegistry::new());
    let mut original = pod(AWS, vec![container("app", "nginx", &["nginx"], &[])]);
    original.spec.as_mut().unwrap().init_containers =
        Some(vec![container("migrate", "flyway", &["flyway", "migrate"], &[])]);

    let mutation = secrets_mutator(&state, &original, "apps").await.unwrap();
    let init = spec(&mutation.pod).init_containers.clone().unwrap();

    assert_eq!(mutation.containers_mutated, 2);
    assert_eq!(init.len(), 2);
    assert_eq!(init[0].name, INIT_CONTAINER_NAME);
    assert_eq!(init[1].name, "migrate");
    assert_eq!(init[1].command, Some(vec![WRAPPER_BINARY_PATH.to_string()]));
}
