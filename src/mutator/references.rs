//! # Secret Reference Detection
//!
//! Finds the environment values of a container that point at a secret
//! manager, including values hidden behind `valueFrom` / `envFrom`
//! ConfigMap and Secret indirection.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvFromSource, EnvVar, EnvVarSource};
use tracing::debug;

use crate::error::LookupError;
use crate::kubernetes::ObjectLookup;
use crate::provider::SecretManagerConfig;

/// Literal and indirect secret references of `container`, as literal env entries
///
/// `envFrom` sources come first, then `env` in declaration order.
///
/// # Errors
///
/// Lookup failures other than a missing object, and a missing object behind
/// a non-optional `envFrom`.
pub async fn collect_secret_references(
    lookup: &dyn ObjectLookup,
    config: &SecretManagerConfig,
    namespace: &str,
    container: &Container,
) -> Result<Vec<EnvVar>, LookupError> {
    let mut references = Vec::new();

    for source in container.env_from.iter().flatten() {
        references.extend(resolve_env_from(lookup, config, namespace, source).await?);
    }

    for env in container.env.iter().flatten() {
        match (&env.value, &env.value_from) {
            (Some(value), _) if config.has_secret_prefix(value) => references.push(env.clone()),
            (None, Some(source)) => {
                if let Some(resolved) = resolve_value_from(lookup, config, namespace, env, source).await? {
                    references.push(resolved);
                }
            }
            _ => {}
        }
    }

    Ok(references)
}

/// Resolve a single `valueFrom`
///
/// A missing object or key is "no match" regardless of `optional`.
async fn resolve_value_from(
    lookup: &dyn ObjectLookup,
    config: &SecretManagerConfig,
    namespace: &str,
    env: &EnvVar,
    source: &EnvVarSource,
) -> Result<Option<EnvVar>, LookupError> {
    let (data, key) = if let Some(selector) = &source.config_map_key_ref {
        (lookup.get_config_map(namespace, &selector.name).await, &selector.key)
    } else if let Some(selector) = &source.secret_key_ref {
        (lookup.get_secret(namespace, &selector.name).await, &selector.key)
    } else {
        // fieldRef / resourceFieldRef never carry secret references
        return Ok(None);
    };

    let data = match data {
        Ok(data) => data,
        Err(e) if e.is_not_found() => {
            debug!(env = %env.name, error = %e, "Referenced object not found, ignoring");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    Ok(data
        .get(key)
        .filter(|value| config.has_secret_prefix(value))
        .map(|value| EnvVar {
            name: env.name.clone(),
            value: Some(value.clone()),
            value_from: None,
        }))
}

async fn resolve_env_from(
    lookup: &dyn ObjectLookup,
    config: &SecretManagerConfig,
    namespace: &str,
    source: &EnvFromSource,
) -> Result<Vec<EnvVar>, LookupError> {
    let (data, optional) = if let Some(config_map) = &source.config_map_ref {
        (
            lookup.get_config_map(namespace, &config_map.name).await,
            config_map.optional.unwrap_or(false),
        )
    } else if let Some(secret) = &source.secret_ref {
        (
            lookup.get_secret(namespace, &secret.name).await,
            secret.optional.unwrap_or(false),
        )
    } else {
        return Ok(Vec::new());
    };

    let data: BTreeMap<String, String> = match data {
        Ok(data) => data,
        Err(e) if e.is_not_found() && optional => {
            debug!(error = %e, "Optional envFrom source not found, skipping");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let prefix = source.prefix.as_deref().unwrap_or_default();
    Ok(data
        .into_iter()
        .filter(|(_, value)| config.has_secret_prefix(value))
        .map(|(key, value)| EnvVar {
            name: format!("{prefix}{key}"),
            value: Some(value),
            value_from: None,
        })
        .collect())
}
