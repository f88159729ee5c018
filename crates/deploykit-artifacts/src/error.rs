//! Error types for deploykit-artifacts

use thiserror::Error;

/// Errors that can occur while fetching or packaging model artifacts
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// No weight file with the expected suffix was found
    #[error("no '{suffix}' weight files found in {dir}")]
    MissingWeights { dir: String, suffix: String },

    /// Artifact directory holds no files to archive
    #[error("artifact directory is empty: {0}")]
    EmptyArtifactDir(String),

    /// External tool is not installed or not in PATH
    #[error("{0} is not installed or not in PATH")]
    ToolNotFound(String),

    /// External tool exited with a failure status
    #[error("{tool} failed: {stderr}")]
    CommandFailed { tool: String, stderr: String },

    /// Glob pattern could not be compiled
    #[error("invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Hub rejected the credentials (gated or private repository)
    #[error("hub access denied for {0}; set HF_TOKEN")]
    Unauthorized(String),

    /// Repository or revision not found on the hub
    #[error("repository not found on hub: {0}")]
    RepoNotFound(String),

    /// Unexpected hub response status
    #[error("hub returned {status} for {url}")]
    HubStatus { status: u16, url: String },

    /// Hub listed a file path that would escape the destination directory
    #[error("refusing unsafe repository path '{0}'")]
    UnsafePath(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ArtifactError {
    fn from(err: reqwest::Error) -> Self {
        ArtifactError::Http(err.to_string())
    }
}
