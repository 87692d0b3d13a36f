//! # Registry Client
//!
//! Minimal OCI distribution client that reads an image's config blob.
//!
//! 1. Pull credentials are taken from the pod's `imagePullSecrets`
//!    (`kubernetes.io/dockerconfigjson`), missing secrets are skipped.
//! 2. Requests go out anonymously first. A `401` with a `Bearer` challenge
//!    fetches a token from the realm and retries, a `Basic` challenge retries
//!    with the pull credentials.
//! 3. Manifest lists and OCI indexes are resolved to the configured platform.
//!
//! Nothing is memoized here, a moved tag is seen by the next admission
//! request. [`super::RequestCache`] dedupes lookups within one pod.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_IMAGE_PLATFORM, DEFAULT_REGISTRY_TIMEOUT_SECS};
use crate::error::{LookupError, RegistryError};
use crate::kubernetes::ObjectLookup;
use crate::observability::metrics;

use super::reference::{normalize_registry, ImageReference};
use super::{ImageConfig, ImageRegistry};

const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// `os/architecture[/variant]` picked from multi-arch indexes
    pub platform: String,
    /// Accept invalid registry TLS certificates
    pub skip_verify: bool,
    pub timeout: Duration,
    /// Registry hosts reached over plain HTTP
    pub insecure_registries: HashSet<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            platform: DEFAULT_IMAGE_PLATFORM.to_string(),
            skip_verify: false,
            timeout: Duration::from_secs(DEFAULT_REGISTRY_TIMEOUT_SECS),
            insecure_registries: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Platform {
    os: String,
    architecture: String,
    variant: Option<String>,
}

impl Platform {
    fn parse(value: &str) -> Result<Self, RegistryError> {
        let parts: Vec<&str> = value.split('/').collect();
        match parts.as_slice() {
            [os, architecture] if !os.is_empty() && !architecture.is_empty() => Ok(Self {
                os: (*os).to_string(),
                architecture: (*architecture).to_string(),
                variant: None,
            }),
            [os, architecture, variant]
                if !os.is_empty() && !architecture.is_empty() && !variant.is_empty() =>
            {
                Ok(Self {
                    os: (*os).to_string(),
                    architecture: (*architecture).to_string(),
                    variant: Some((*variant).to_string()),
                })
            }
            _ => Err(RegistryError::InvalidPlatform(value.to_string())),
        }
    }

    fn matches(&self, candidate: &PlatformSpec) -> bool {
        candidate.os == self.os
            && candidate.architecture == self.architecture
            && match &self.variant {
                Some(variant) => candidate.variant.as_deref() == Some(variant.as_str()),
                None => true,
            }
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// [`ImageRegistry`] talking to the image's registry over HTTP
pub struct RegistryClient {
    http: reqwest::Client,
    lookup: Arc<dyn ObjectLookup>,
    platform: Platform,
    insecure_registries: HashSet<String>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("platform", &self.platform)
            .field("insecure_registries", &self.insecure_registries)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// # Errors
    ///
    /// Invalid platform string or HTTP client construction failure.
    pub fn new(
        lookup: Arc<dyn ObjectLookup>,
        options: RegistryOptions,
    ) -> Result<Self, RegistryError> {
        let platform = Platform::parse(&options.platform)?;
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.skip_verify)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            lookup,
            platform,
            insecure_registries: options.insecure_registries,
        })
    }

    fn base_url(&self, registry: &str) -> String {
        let scheme = if self.insecure_registries.contains(registry) {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{registry}")
    }

    async fn pull_credentials(
        &self,
        namespace: &str,
        pod_spec: &PodSpec,
        registry: &str,
    ) -> Result<Option<Credentials>, RegistryError> {
        for secret_ref in pod_spec.image_pull_secrets.iter().flatten() {
            let name = secret_ref.name.as_str();
            if name.is_empty() {
                continue;
            }
            let data = match self.lookup.get_secret(namespace, name).await {
                Ok(data) => data,
                Err(LookupError::NotFound { .. }) => {
                    debug!(namespace, secret = name, "Image pull secret not found, skipping");
                    continue;
                }
                Err(e) => return Err(RegistryError::PullSecret(e)),
            };
            if let Some(credentials) = credentials_from_docker_config(&data, registry) {
                debug!(namespace, secret = name, registry, "Using image pull secret");
                return Ok(Some(credentials));
            }
        }
        Ok(None)
    }

    async fn fetch_image_config(
        &self,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<ImageConfig, RegistryError> {
        let mut session = Session {
            client: self,
            registry: &reference.registry,
            credentials,
            token: None,
            basic: false,
        };
        let base = self.base_url(&reference.registry);
        let manifests_url = format!("{base}/v2/{}/manifests", reference.repository);
        let accept = [
            DOCKER_MANIFEST_V2,
            DOCKER_MANIFEST_LIST_V2,
            OCI_MANIFEST_V1,
            OCI_INDEX_V1,
        ]
        .join(", ");

        let mut manifest = session
            .get_json::<Manifest>(
                &format!("{manifests_url}/{}", reference.manifest_reference()),
                &accept,
            )
            .await?;

        if let Some(entries) = &manifest.manifests {
            let entry = entries
                .iter()
                .find(|entry| entry.platform.as_ref().is_some_and(|p| self.platform.matches(p)))
                .ok_or_else(|| RegistryError::PlatformNotFound {
                    image: reference.to_string(),
                    platform: self.platform_string(),
                })?;
            debug!(image = %reference, digest = %entry.digest, "Resolved image index to platform manifest");
            manifest = session
                .get_json::<Manifest>(&format!("{manifests_url}/{}", entry.digest), &accept)
                .await?;
        }

        let config = manifest.config.ok_or_else(|| {
            RegistryError::UnsupportedMediaType(
                manifest
                    .media_type
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        })?;

        let blob = session
            .get_json::<ConfigBlob>(
                &format!("{base}/v2/{}/blobs/{}", reference.repository, config.digest),
                "application/json",
            )
            .await?;

        let container_config = blob.config.unwrap_or_default();
        Ok(ImageConfig {
            entrypoint: container_config.entrypoint.unwrap_or_default(),
            cmd: container_config.cmd.unwrap_or_default(),
        })
    }

    fn platform_string(&self) -> String {
        match &self.platform.variant {
            Some(variant) => format!("{}/{}/{variant}", self.platform.os, self.platform.architecture),
            None => format!("{}/{}", self.platform.os, self.platform.architecture),
        }
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn get_image_config(
        &self,
        namespace: &str,
        container: &Container,
        pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError> {
        let image = container.image.as_deref().unwrap_or_default();
        let reference = ImageReference::parse(image)?;

        let credentials = self
            .pull_credentials(namespace, pod_spec, &reference.registry)
            .await?;

        match self.fetch_image_config(&reference, credentials.as_ref()).await {
            Ok(config) => {
                metrics::increment_registry_lookups("success");
                info!(
                    image = %reference,
                    entrypoint = ?config.entrypoint,
                    cmd = ?config.cmd,
                    "Resolved image config from registry"
                );
                Ok(config)
            }
            Err(e) => {
                metrics::increment_registry_lookups("error");
                Err(e)
            }
        }
    }
}

/// Per-lookup request state, holds the bearer token once obtained
struct Session<'a> {
    client: &'a RegistryClient,
    registry: &'a str,
    credentials: Option<&'a Credentials>,
    token: Option<String>,
    /// Send the pull credentials as Basic auth after a `Basic` challenge
    basic: bool,
}

impl Session<'_> {
    async fn get_json<T: DeserializeOwned>(
        &mut self,
        url: &str,
        accept: &str,
    ) -> Result<T, RegistryError> {
        let response = self.get(url, accept).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get(&mut self, url: &str, accept: &str) -> Result<Response, RegistryError> {
        let response = self.authorize(self.client.http.get(url)).header(ACCEPT, accept).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return self.check_status(url, response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(parse_challenge);

        match challenge {
            Some(Challenge::Bearer(params)) if self.token.is_none() => {
                self.token = Some(self.fetch_token(&params).await?);
            }
            Some(Challenge::Basic) if self.credentials.is_some() && !self.basic => {
                self.basic = true;
            }
            _ => return self.check_status(url, response),
        }

        let retry = self.authorize(self.client.http.get(url)).header(ACCEPT, accept).send().await?;
        self.check_status(url, retry)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.token, self.credentials) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some(credentials)) if self.basic => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            _ => request,
        }
    }

    fn check_status(&self, url: &str, response: Response) -> Result<Response, RegistryError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(RegistryError::UnexpectedStatus {
            registry: self.registry.to_string(),
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }

    async fn fetch_token(&self, params: &BTreeMap<String, String>) -> Result<String, RegistryError> {
        let realm = params.get("realm").ok_or_else(|| RegistryError::Authentication {
            registry: self.registry.to_string(),
            reason: "bearer challenge without realm".to_string(),
        })?;

        let query: Vec<(&str, &str)> = ["service", "scope"]
            .iter()
            .filter_map(|key| params.get(*key).map(|value| (*key, value.as_str())))
            .collect();

        let mut request = self.client.http.get(realm).query(&query);
        if let Some(credentials) = self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Authentication {
                registry: self.registry.to_string(),
                reason: format!("token endpoint {realm} returned status {}", response.status().as_u16()),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&response.bytes().await?)?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| RegistryError::Authentication {
                registry: self.registry.to_string(),
                reason: "token endpoint returned no token".to_string(),
            })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Challenge {
    Bearer(BTreeMap<String, String>),
    Basic,
    Other,
}

/// Parse a `WWW-Authenticate` header value
fn parse_challenge(header: &str) -> Challenge {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Challenge::Basic;
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Challenge::Other;
    }

    let mut params = BTreeMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    for c in rest.chars() {
        match c {
            '"' if in_value => in_quotes = !in_quotes,
            '=' if !in_value => in_value = true,
            ',' if !in_quotes => {
                if !key.trim().is_empty() {
                    params.insert(key.trim().to_string(), value.clone());
                }
                key.clear();
                value.clear();
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    if !key.trim().is_empty() {
        params.insert(key.trim().to_string(), value);
    }

    Challenge::Bearer(params)
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

/// Credentials for `registry` from decoded `kubernetes.io/dockerconfigjson` data
fn credentials_from_docker_config(
    data: &BTreeMap<String, String>,
    registry: &str,
) -> Option<Credentials> {
    let raw = data.get(DOCKER_CONFIG_JSON_KEY)?;
    let config: DockerConfig = match serde_json::from_str(raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed docker config in image pull secret");
            return None;
        }
    };

    let entry = config
        .auths
        .iter()
        .find(|(host, _)| normalize_registry(host) == registry)
        .map(|(_, auth)| auth)?;

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        });
    }

    let decoded = STANDARD.decode(entry.auth.as_deref()?.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Unified view of image manifests and manifest lists / indexes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    media_type: Option<String>,
    config: Option<Descriptor>,
    manifests: Option<Vec<Descriptor>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    platform: Option<PlatformSpec>,
}

#[derive(Debug, Deserialize)]
struct PlatformSpec {
    os: String,
    architecture: String,
    variant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Entrypoint")]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd")]
    cmd: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}
