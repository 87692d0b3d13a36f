//! # GCP Secret Manager
//!
//! Contributes the project/secret flags and, when a service account key
//! secret is configured, mounts it and points the wrapper at the key file.

use k8s_openapi::api::core::v1::{Volume, VolumeMount};

use crate::annotations;
use crate::constants::{
    GCP_SERVICE_ACCOUNT_CREDENTIALS_FILE_NAME, GOOGLE_CLOUD_KEY_MOUNT_PATH,
    GOOGLE_CLOUD_KEY_VOLUME_NAME,
};
use crate::error::MutationError;

use super::{push_flag, require, secret_volume, BackendKind, Contribution};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcpConfig {
    pub enabled: bool,
    pub project_id: String,
    pub secret_name: String,
    pub secret_version: String,
    /// Kubernetes secret with the service account key, optional
    pub service_account_key_secret_name: String,
}

/// Path of the mounted service account key file
pub(crate) fn google_application_credentials_path() -> String {
    format!("{GOOGLE_CLOUD_KEY_MOUNT_PATH}/{GCP_SERVICE_ACCOUNT_CREDENTIALS_FILE_NAME}")
}

pub(crate) fn google_cloud_key_mount() -> VolumeMount {
    VolumeMount {
        name: GOOGLE_CLOUD_KEY_VOLUME_NAME.to_string(),
        mount_path: GOOGLE_CLOUD_KEY_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

impl GcpConfig {
    pub(crate) fn validate(&self) -> Result<(), MutationError> {
        require(
            &self.project_id,
            BackendKind::Gcp,
            "project id",
            annotations::GCP_PROJECT_ID,
        )?;
        require(
            &self.secret_name,
            BackendKind::Gcp,
            "secret name",
            annotations::GCP_SECRET_NAME,
        )
    }

    pub(crate) fn contribution(&self) -> Contribution {
        let mut args = vec![BackendKind::Gcp.as_str().to_string()];
        push_flag(&mut args, "project-id", &self.project_id);
        push_flag(&mut args, "secret-name", &self.secret_name);
        push_flag(&mut args, "secret-version", &self.secret_version);

        let mut volume_mounts = Vec::new();
        if !self.service_account_key_secret_name.is_empty() {
            push_flag(
                &mut args,
                "google-application-credentials",
                &google_application_credentials_path(),
            );
            volume_mounts.push(google_cloud_key_mount());
        }

        Contribution {
            env: Vec::new(),
            volume_mounts,
            args,
        }
    }

    pub(crate) fn volumes(&self) -> Vec<Volume> {
        if self.service_account_key_secret_name.is_empty() {
            return Vec::new();
        }
        vec![secret_volume(
            GOOGLE_CLOUD_KEY_VOLUME_NAME,
            &self.service_account_key_secret_name,
        )]
    }
}
