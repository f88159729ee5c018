//! Hugging Face Hub client
//!
//! Lists repository files at a revision and downloads individual files
//! over the hub's public HTTP API. Gated and private repositories need
//! an access token (`HF_TOKEN`).

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::ArtifactError;
use crate::Result;

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub base URL
    pub endpoint: String,
    /// Access token for gated or private repositories
    pub token: Option<String>,
}

/// Public hub used when `HF_ENDPOINT` is unset
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_vars(
            std::env::var("HF_ENDPOINT").ok(),
            std::env::var("HF_TOKEN").ok(),
        )
    }
}

impl HubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    fn from_vars(endpoint: Option<String>, token: Option<String>) -> Self {
        let endpoint = endpoint.filter(|e| !e.is_empty());
        HubConfig {
            token: token.filter(|t| !t.is_empty()),
            ..Self::new(endpoint.as_deref().unwrap_or(DEFAULT_HUB_ENDPOINT))
        }
    }

    /// Create config for a specific hub endpoint
    pub fn new(endpoint: &str) -> Self {
        HubConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Set access token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Repository metadata returned by `/api/models/{id}/revision/{rev}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository id (`owner/name`)
    pub id: Option<String>,
    /// Commit sha the revision resolved to
    pub sha: Option<String>,
    /// Files in the repository
    #[serde(default)]
    pub siblings: Vec<RepoSibling>,
}

/// A single file entry in [`RepoInfo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSibling {
    /// Path relative to the repository root
    pub rfilename: String,
}

/// HTTP client for the model hub
pub struct HubClient {
    config: HubConfig,
    http_client: reqwest::Client,
}

impl HubClient {
    /// Create a new hub client
    pub fn new(config: HubConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("deploykit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HubClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(HubConfig::from_env())
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Fetch repository metadata at a revision
    pub async fn repo_info(&self, repo_id: &str, revision: &str) -> Result<RepoInfo> {
        let url = format!(
            "{}/api/models/{}/revision/{}",
            self.config.endpoint,
            repo_id,
            encode_revision(revision)
        );
        debug!(%url, "querying hub repository");

        let response = self.authorized(self.http_client.get(&url)).send().await?;
        let response = check_status(response, repo_id, &url)?;
        Ok(response.json::<RepoInfo>().await?)
    }

    /// List repository file paths at a revision
    pub async fn list_files(&self, repo_id: &str, revision: &str) -> Result<Vec<String>> {
        let info = self.repo_info(repo_id, revision).await?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Download one file into `dest_dir`, preserving its relative path.
    ///
    /// The body is streamed to a `.part` file that is renamed on success
    /// and removed on failure. Paths that are absolute or contain `..`
    /// are rejected.
    pub async fn download_file(
        &self,
        repo_id: &str,
        revision: &str,
        path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.config.endpoint,
            repo_id,
            encode_revision(revision),
            path
        );

        let target = dest_dir.join(repo_relative_path(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = target.with_file_name(format!(
            "{}.part",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        let response = self.authorized(self.http_client.get(&url)).send().await?;
        let mut response = check_status(response, repo_id, &url)?;

        let streamed = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut written: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, ArtifactError>(written)
        }
        .await;

        let written = match streamed {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    warn!(
                        file = %partial.display(),
                        error = %cleanup,
                        "could not remove partial download"
                    );
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &target).await?;
        info!(repo = repo_id, file = path, bytes = written, "downloaded");
        Ok(target)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn check_status(response: reqwest::Response, repo_id: &str, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        401 | 403 => Err(ArtifactError::Unauthorized(repo_id.to_string())),
        404 => Err(ArtifactError::RepoNotFound(format!("{} ({})", repo_id, url))),
        code => Err(ArtifactError::HubStatus {
            status: code,
            url: url.to_string(),
        }),
    }
}

/// Validate a repository file name as a path below the destination.
fn repo_relative_path(path: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(ArtifactError::UnsafePath(path.to_string())),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ArtifactError::UnsafePath(path.to_string()));
    }
    Ok(relative)
}

/// Revisions such as `refs/pr/1` must travel as a single path segment.
fn encode_revision(revision: &str) -> String {
    revision.replace('/', "%2F")
}
