//! Environment-driven settings shared by the CLI and the cloud backend.

use deploykit_artifacts::HubConfig;
use serde::{Deserialize, Serialize};

/// Role looked up when no role ARN is configured.
pub const DEFAULT_ROLE_NAME: &str = "sagemaker_execution_role";

/// Workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Cloud region (falls back to the CLI's configured region)
    pub region: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    /// Explicit execution role ARN
    pub role_arn: Option<String>,
    /// Role name resolved when `role_arn` is unset
    pub role_name: String,
    /// Artifact bucket (defaults to the platform's per-account bucket)
    pub bucket: Option<String>,
    /// Key prefix inside the bucket
    pub key_prefix: Option<String>,
    /// Model hub connection
    pub hub: HubConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            region: env_var("AWS_REGION").or_else(|| env_var("AWS_DEFAULT_REGION")),
            profile: env_var("AWS_PROFILE"),
            role_arn: env_var("SAGEMAKER_ROLE_ARN"),
            role_name: env_var("SAGEMAKER_ROLE_NAME")
                .unwrap_or_else(|| DEFAULT_ROLE_NAME.to_string()),
            bucket: env_var("DEPLOYKIT_BUCKET"),
            key_prefix: env_var("DEPLOYKIT_PREFIX"),
            hub: HubConfig::from_env(),
        }
    }
}

impl Settings {
    /// Create settings from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_role_arn(mut self, role_arn: &str) -> Self {
        self.role_arn = Some(role_arn.to_string());
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
