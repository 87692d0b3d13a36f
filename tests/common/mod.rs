//! Common test utilities for mutation tests
//!
//! Pod builders and webhook state wired to the in-memory collaborators.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use kube::api::ObjectMeta;

use secrets_consumer_webhook::kubernetes::StaticObjectLookup;
use secrets_consumer_webhook::mutator::InitContainerSettings;
use secrets_consumer_webhook::registry::StaticImageRegistry;
use secrets_consumer_webhook::webhook::WebhookState;

pub fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn container(name: &str, image: &str, command: &[&str], args: &[&str]) -> Container {
    let to_vec = |values: &[&str]| -> Option<Vec<String>> {
        (!values.is_empty()).then(|| values.iter().map(ToString::to_string).collect())
    };
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: to_vec(command),
        args: to_vec(args),
        ..Default::default()
    }
}

pub fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn pod(pairs: &[(&str, &str)], containers: Vec<Container>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("app".to_string()),
            namespace: Some("apps".to_string()),
            annotations: Some(annotations(pairs)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn state(lookup: StaticObjectLookup, registry: StaticImageRegistry) -> WebhookState {
    WebhookState {
        lookup: Arc::new(lookup),
        registry: Arc::new(registry),
        init_container: InitContainerSettings::default(),
    }
}

pub fn spec(pod: &Pod) -> &PodSpec {
    pod.spec.as_ref().expect("pod has a spec")
}
