//! # Kubernetes Lookups
//!
//! ConfigMap and Secret getter used by the reference resolver and by the
//! registry client (image pull secrets).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use tracing::debug;

use crate::error::LookupError;

/// Read access to the key/value data of ConfigMaps and Secrets
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    /// # Errors
    ///
    /// [`LookupError::NotFound`] when the ConfigMap does not exist, any other
    /// API failure as [`LookupError::Api`].
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError>;

    /// Secret data with values decoded as UTF-8
    ///
    /// # Errors
    ///
    /// Same contract as [`ObjectLookup::get_config_map`].
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError>;
}

/// [`ObjectLookup`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeObjectLookup {
    client: Client,
}

impl std::fmt::Debug for KubeObjectLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectLookup").finish_non_exhaustive()
    }
}

impl KubeObjectLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLookup for KubeObjectLookup {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match config_maps.get(name).await {
            Ok(config_map) => Ok(config_map.data.unwrap_or_default()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(LookupError::NotFound {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(LookupError::Api(e)),
        }
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.get(name).await {
            Ok(secret) => Ok(secret_string_data(name, secret)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(LookupError::NotFound {
                kind: "Secret",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(LookupError::Api(e)),
        }
    }
}

/// Flatten `data` and `stringData` into plain strings, `stringData` wins
fn secret_string_data(name: &str, secret: Secret) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for (key, bytes) in secret.data.unwrap_or_default() {
        match String::from_utf8(bytes.0) {
            Ok(value) => {
                values.insert(key, value);
            }
            Err(_) => debug!(secret = name, key = %key, "Skipping non UTF-8 secret value"),
        }
    }
    values.extend(secret.string_data.unwrap_or_default());
    values
}

/// In-memory [`ObjectLookup`] keyed by `(namespace, name)`
///
/// Used by tests and local dry runs where no cluster is available.
#[derive(Debug, Clone, Default)]
pub struct StaticObjectLookup {
    config_maps: HashMap<(String, String), BTreeMap<String, String>>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
}

impl StaticObjectLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.config_maps
            .insert((namespace.to_string(), name.to_string()), to_map(data));
        self
    }

    #[must_use]
    pub fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.secrets
            .insert((namespace.to_string(), name.to_string()), to_map(data));
        self
    }
}

fn to_map(data: &[(&str, &str)]) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[async_trait]
impl ObjectLookup for StaticObjectLookup {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError> {
        self.config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, LookupError> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                kind: "Secret",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
