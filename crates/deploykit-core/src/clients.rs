//! Client trait definitions for deploykit
//!
//! These traits define the external services the workflow talks to:
//! - `SessionProvider`: execution identity and default storage location
//! - `ModelRegistry`: model file listing and download
//! - `ObjectStore`: artifact upload
//! - `ImageResolver`: serving container image lookup
//! - `InferencePlatform`: endpoint provisioning, prediction and deletion
//!
//! All network-facing traits are async and backend-agnostic. In-memory
//! fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy_config::DeploymentConfig;
use crate::error::Result;
use crate::model::ModelRef;

// ---------------------------------------------------------------------------
// SessionProvider: identity and default storage
// ---------------------------------------------------------------------------

/// Resolved platform session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Cloud region
    pub region: String,
    /// Account identifier
    pub account: String,
    /// Execution role the platform assumes to read artifacts and pull images
    pub role_arn: String,
    /// Default bucket for uploaded artifacts
    pub default_bucket: String,
}

/// Resolves the identity and default storage location of the caller.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns `DeployError::Authorization` when no execution role can be found.
    async fn resolve(&self) -> Result<Session>;
}

// ---------------------------------------------------------------------------
// ModelRegistry: model files
// ---------------------------------------------------------------------------

/// Remote model registry.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Repository-relative paths of every file at the model's revision.
    async fn list_files(&self, model: &ModelRef) -> Result<Vec<String>>;

    /// Download one file into `dest_dir`, preserving its relative path.
    async fn download_file(&self, model: &ModelRef, path: &str, dest_dir: &Path)
        -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// ObjectStore: artifact upload
// ---------------------------------------------------------------------------

/// Remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local` to `destination` and return the resolved object URI.
    ///
    /// A destination ending in `/` receives the local file name.
    async fn upload(&self, local: &Path, destination: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ImageResolver: serving container images
// ---------------------------------------------------------------------------

/// Fully qualified container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageUri(pub String);

impl ImageUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Looks up serving images by backend name and version.
pub trait ImageResolver: Send + Sync {
    /// Returns `DeployError::UnknownImage` for unknown backends, versions or regions.
    fn resolve(&self, backend: &str, version: &str, region: &str) -> Result<ImageUri>;
}

// ---------------------------------------------------------------------------
// InferencePlatform: managed endpoints
// ---------------------------------------------------------------------------

/// Everything the platform needs to provision an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Name for the model registration
    pub model_name: String,
    /// Name for the endpoint (and its endpoint configuration)
    pub endpoint_name: String,
    /// Execution role
    pub role_arn: String,
    /// Serving container image
    pub image: ImageUri,
    /// Location of the uploaded model archive
    pub model_data_uri: String,
    /// Container environment
    pub config: DeploymentConfig,
    /// Instance class, e.g. `ml.g5.12xlarge`
    pub instance_type: String,
    /// Number of instances behind the endpoint
    pub instance_count: u32,
    /// GPUs per replica, as passed to the container in `SM_NUM_GPUS`
    pub num_gpus: u32,
    /// How long the container may take to report healthy
    pub health_check_timeout: Duration,
}

/// Reference to a provisioned endpoint. Persists until deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub endpoint_name: String,
    pub model_name: String,
}

impl EndpointHandle {
    pub fn new(endpoint_name: impl Into<String>, model_name: impl Into<String>) -> Self {
        EndpointHandle {
            endpoint_name: endpoint_name.into(),
            model_name: model_name.into(),
        }
    }
}

impl std::fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (model {})", self.endpoint_name, self.model_name)
    }
}

/// Managed inference platform.
#[async_trait]
pub trait InferencePlatform: Send + Sync {
    /// Provision an endpoint and block until it is in service.
    ///
    /// Fails with `ProvisioningFailed` or `ProvisioningTimedOut`.
    async fn deploy(&self, request: &DeployRequest) -> Result<EndpointHandle>;

    /// Send a JSON payload and return the JSON response.
    async fn predict(
        &self,
        endpoint: &EndpointHandle,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Delete the model registration.
    async fn delete_model(&self, endpoint: &EndpointHandle) -> Result<()>;

    /// Delete the endpoint and its configuration.
    async fn delete_endpoint(&self, endpoint: &EndpointHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_handle_display() {
        let handle = EndpointHandle::new("llama-ep", "llama-model");
        assert_eq!(handle.to_string(), "llama-ep (model llama-model)");
    }

    #[test]
    fn test_endpoint_handle_serde_roundtrip() {
        let handle = EndpointHandle::new("ep", "m");
        let json = serde_json::to_string(&handle).unwrap();
        let back: EndpointHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(handle, back);
    }
}
