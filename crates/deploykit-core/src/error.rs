//! Error taxonomy for the deployment workflow.

use deploykit_artifacts::ArtifactError;

/// Deployment workflow errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("no '{suffix}' weight files found in {dir}")]
    MissingWeights { dir: String, suffix: String },

    #[error("invalid model reference: {0}")]
    InvalidModelRef(String),

    #[error("invalid deployment configuration: {0}")]
    InvalidConfig(String),

    #[error("model registry error: {0}")]
    Registry(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("{0} is not installed or not in PATH")]
    ToolNotFound(String),

    #[error("{tool} failed: {stderr}")]
    CommandFailed { tool: String, stderr: String },

    #[error("unknown image: {0}")]
    UnknownImage(String),

    #[error("endpoint {endpoint} failed to provision: {reason}")]
    ProvisioningFailed { endpoint: String, reason: String },

    #[error("endpoint {endpoint} was not in service after {waited_secs}s")]
    ProvisioningTimedOut { endpoint: String, waited_secs: u64 },

    #[error("invalid response from endpoint: {0}")]
    InvalidResponse(String),

    #[error("teardown incomplete: {0}")]
    Teardown(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// The endpoint was created but never reached service; its model,
    /// endpoint configuration and endpoint may still exist.
    pub fn leaves_endpoint(&self) -> bool {
        matches!(
            self,
            DeployError::ProvisioningFailed { .. } | DeployError::ProvisioningTimedOut { .. }
        )
    }
}

impl From<ArtifactError> for DeployError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::MissingWeights { dir, suffix } => {
                DeployError::MissingWeights { dir, suffix }
            }
            ArtifactError::ToolNotFound(tool) => DeployError::ToolNotFound(tool),
            ArtifactError::CommandFailed { tool, stderr } => {
                DeployError::CommandFailed { tool, stderr }
            }
            ArtifactError::Unauthorized(repo) => {
                DeployError::Authorization(format!("hub access denied for {repo}"))
            }
            ArtifactError::Io(e) => DeployError::Io(e),
            ArtifactError::Json(e) => DeployError::Serialization(e),
            e @ (ArtifactError::RepoNotFound(_)
            | ArtifactError::HubStatus { .. }
            | ArtifactError::UnsafePath(_)
            | ArtifactError::Http(_)) => DeployError::Registry(e.to_string()),
            e @ (ArtifactError::EmptyArtifactDir(_) | ArtifactError::InvalidPattern { .. }) => {
                DeployError::Artifact(e.to_string())
            }
        }
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_weights_maps_from_artifact_error() {
        let err: DeployError = ArtifactError::MissingWeights {
            dir: "/work/model".to_string(),
            suffix: ".safetensors".to_string(),
        }
        .into();
        assert!(matches!(err, DeployError::MissingWeights { .. }));
        assert!(err.to_string().contains("/work/model"));
    }

    #[test]
    fn test_hub_unauthorized_is_authorization() {
        let err: DeployError = ArtifactError::Unauthorized("meta/llama".to_string()).into();
        assert!(matches!(err, DeployError::Authorization(_)));
    }

    #[test]
    fn test_provisioning_timeout_display() {
        let err = DeployError::ProvisioningTimedOut {
            endpoint: "llama-2024".to_string(),
            waited_secs: 300,
        };
        let msg = err.to_string();
        assert!(msg.contains("llama-2024"));
        assert!(msg.contains("300"));
    }

    #[test]
    fn test_only_provisioning_errors_leave_endpoint() {
        assert!(DeployError::ProvisioningTimedOut {
            endpoint: "e".to_string(),
            waited_secs: 1,
        }
        .leaves_endpoint());
        assert!(DeployError::ProvisioningFailed {
            endpoint: "e".to_string(),
            reason: "health check".to_string(),
        }
        .leaves_endpoint());
        assert!(!DeployError::UnknownImage("lmi".to_string()).leaves_endpoint());
        assert!(!DeployError::Authorization("denied".to_string()).leaves_endpoint());
    }
}
