//! # AWS Secrets Manager
//!
//! The AWS strategy only contributes wrapper flags, credentials come from
//! the pod's service account (IRSA) or the optional role to assume.

use crate::annotations;
use crate::error::MutationError;

use super::{push_flag, require, BackendKind, Contribution};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsConfig {
    pub enabled: bool,
    pub region: String,
    pub secret_name: String,
    pub previous_version: String,
    pub role_arn: String,
}

impl AwsConfig {
    pub(crate) fn validate(&self) -> Result<(), MutationError> {
        require(
            &self.secret_name,
            BackendKind::Aws,
            "secret name",
            annotations::AWS_SECRET_NAME,
        )
    }

    pub(crate) fn contribution(&self) -> Contribution {
        let mut args = vec![BackendKind::Aws.as_str().to_string()];
        push_flag(&mut args, "region", &self.region);
        push_flag(&mut args, "secret-name", &self.secret_name);
        push_flag(&mut args, "role-arn", &self.role_arn);
        push_flag(&mut args, "previous-version", &self.previous_version);

        Contribution {
            args,
            ..Default::default()
        }
    }
}
