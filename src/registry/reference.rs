//! Image reference parsing
//!
//! Follows the Docker rules: the first path component is a registry host
//! only when it contains a `.` or `:` or is `localhost`, otherwise the image
//! lives on Docker Hub and single-component repositories get `library/`.

use std::fmt;

use crate::constants::DOCKER_HUB_REGISTRY;
use crate::error::RegistryError;

const DEFAULT_TAG: &str = "latest";

/// Hosts that are aliases of Docker Hub
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", DOCKER_HUB_REGISTRY];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, with port when one is given
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse `[registry/]repository[:tag][@digest]`
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidReference`] for empty or malformed references.
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidReference(image.to_string());
        let image = image.trim();
        if image.is_empty() || image.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) if digest.contains(':') => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid()),
            None => (image, None),
        };

        // A ':' after the last '/' separates the tag, earlier ones belong to a port.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };
        if tag.as_deref() == Some("") {
            return Err(invalid());
        }

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (normalize_registry(host), rest.to_string()),
            _ => (DOCKER_HUB_REGISTRY.to_string(), name.to_string()),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid());
        }

        let repository = if registry == DOCKER_HUB_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Manifest reference: the digest when pinned, else the tag (`latest` by default)
    #[must_use]
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Map registry hosts (or docker config keys such as
/// `https://index.docker.io/v1/`) to the host requests are sent to
pub(crate) fn normalize_registry(host: &str) -> String {
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    if DOCKER_HUB_ALIASES.contains(&host) {
        DOCKER_HUB_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}
