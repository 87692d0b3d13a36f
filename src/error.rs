//! # Errors
//!
//! Error taxonomy for the mutation engine.
//!
//! - Configuration errors (a required annotation is missing) stop the
//!   admission chain so the pod can be denied.
//! - Lookup errors come from the ConfigMap/Secret collaborator. Optional
//!   references recover from `NotFound` locally and never surface here.
//! - Registry errors come from resolving a container's implicit entrypoint.

use thiserror::Error;

use crate::provider::BackendKind;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("missing {field} for {backend} - make sure you set the annotation \"{annotation}\" on the Pod")]
    MissingAnnotation {
        backend: BackendKind,
        field: &'static str,
        annotation: &'static str,
    },

    #[error("invalid {backend} configuration: {reason}")]
    InvalidAnnotation {
        backend: BackendKind,
        #[source]
        reason: InvalidAnnotationReason,
    },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("failed to resolve image entrypoint for container {container}: {source}")]
    Registry {
        container: String,
        #[source]
        source: RegistryError,
    },
}

impl MutationError {
    /// Whether this error must stop the mutation chain (the `stop` flag).
    ///
    /// Only configuration errors do; lookup and registry failures are
    /// request-fatal but are reported as plain errors.
    #[must_use]
    pub fn stops_chain(&self) -> bool {
        matches!(
            self,
            MutationError::MissingAnnotation { .. } | MutationError::InvalidAnnotation { .. }
        )
    }

    /// Short error class used as a metric label
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            MutationError::MissingAnnotation { .. } | MutationError::InvalidAnnotation { .. } => {
                "configuration"
            }
            MutationError::Lookup(_) => "lookup",
            MutationError::Registry { .. } => "registry",
        }
    }
}

#[derive(Debug, Error)]
pub enum InvalidAnnotationReason {
    #[error("annotation \"{present}\" requires \"{missing}\" to be set as well")]
    IncompletePair {
        present: &'static str,
        missing: &'static str,
    },
}

/// Errors returned by the ConfigMap/Secret collaborator
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl LookupError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound { .. })
    }
}

/// Errors returned while reading image metadata from a container registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid image reference \"{0}\"")]
    InvalidReference(String),

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry {registry} returned status {status} for {url}")]
    UnexpectedStatus {
        registry: String,
        url: String,
        status: u16,
    },

    #[error("invalid image platform \"{0}\", expected os/architecture[/variant]")]
    InvalidPlatform(String),

    #[error("registry {registry} authentication failed: {reason}")]
    Authentication { registry: String, reason: String },

    #[error("unsupported manifest media type \"{0}\"")]
    UnsupportedMediaType(String),

    #[error("image index for {image} has no manifest for platform {platform}")]
    PlatformNotFound { image: String, platform: String },

    #[error("failed to decode registry response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read image pull secret: {0}")]
    PullSecret(#[from] LookupError),
}
