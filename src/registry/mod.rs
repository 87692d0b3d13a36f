//! # Image Registry
//!
//! Recovers a container's implicit entrypoint and command from its image
//! when the pod spec declares no `command`.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use tokio::sync::Mutex;

use crate::error::RegistryError;
use crate::observability::metrics;

pub mod client;
pub mod reference;

pub use client::{RegistryClient, RegistryOptions};
pub use reference::ImageReference;

/// The `Entrypoint` and `Cmd` of an image config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Image config of `container`, using `pod_spec` for pull credentials
    ///
    /// # Errors
    ///
    /// Any failure to reach the registry or decode its responses.
    async fn get_image_config(
        &self,
        namespace: &str,
        container: &Container,
        pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError>;
}

/// [`ImageRegistry`] answering from a fixed image → config table
#[derive(Debug, Clone, Default)]
pub struct StaticImageRegistry {
    images: HashMap<String, ImageConfig>,
}

impl StaticImageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_image(mut self, image: &str, entrypoint: &[&str], cmd: &[&str]) -> Self {
        self.images.insert(
            image.to_string(),
            ImageConfig {
                entrypoint: entrypoint.iter().map(ToString::to_string).collect(),
                cmd: cmd.iter().map(ToString::to_string).collect(),
            },
        );
        self
    }
}

#[async_trait]
impl ImageRegistry for StaticImageRegistry {
    async fn get_image_config(
        &self,
        _namespace: &str,
        container: &Container,
        _pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError> {
        let image = container.image.clone().unwrap_or_default();
        self.images
            .get(&image)
            .cloned()
            .ok_or(RegistryError::UnexpectedStatus {
                registry: "static".to_string(),
                url: image,
                status: 404,
            })
    }
}

/// Memoizes lookups of one admission request
///
/// Keyed by the container image. Namespace and pull secrets are fixed for
/// the pod, so the key is complete within the request.
pub struct RequestCache<'a> {
    inner: &'a dyn ImageRegistry,
    configs: Mutex<HashMap<String, ImageConfig>>,
}

impl<'a> RequestCache<'a> {
    #[must_use]
    pub fn new(inner: &'a dyn ImageRegistry) -> Self {
        Self {
            inner,
            configs: Mutex::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for RequestCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageRegistry for RequestCache<'_> {
    async fn get_image_config(
        &self,
        namespace: &str,
        container: &Container,
        pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError> {
        let image = container.image.clone().unwrap_or_default();
        if let Some(config) = self.configs.lock().await.get(&image) {
            metrics::increment_registry_lookups("cached");
            return Ok(config.clone());
        }

        let config = self
            .inner
            .get_image_config(namespace, container, pod_spec)
            .await?;
        self.configs.lock().await.insert(image, config.clone());
        Ok(config)
    }
}
