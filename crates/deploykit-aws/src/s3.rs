//! Artifact upload with `aws s3 cp`.

use async_trait::async_trait;
use deploykit_core::{DeployError, ObjectStore, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;

use crate::cli::AwsCli;

/// S3 object store.
#[derive(Debug, Clone)]
pub struct S3Store {
    cli: AwsCli,
}

impl S3Store {
    pub fn new(cli: AwsCli) -> Self {
        S3Store { cli }
    }
}

/// Final object URI; a trailing `/` receives the local file name.
pub fn object_uri(local: &Path, destination: &str) -> Result<String> {
    let key = destination.strip_prefix("s3://").ok_or_else(|| {
        DeployError::InvalidConfig(format!("not an s3:// destination: {destination}"))
    })?;
    if key.is_empty() || key.starts_with('/') {
        return Err(DeployError::InvalidConfig(format!(
            "destination has no bucket: {destination}"
        )));
    }

    if destination.ends_with('/') {
        let name = local.file_name().ok_or_else(|| {
            DeployError::InvalidConfig(format!("{} has no file name", local.display()))
        })?;
        Ok(format!("{destination}{}", name.to_string_lossy()))
    } else {
        Ok(destination.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, local: &Path, destination: &str) -> Result<String> {
        let uri = object_uri(local, destination)?;
        let size = tokio::fs::metadata(local).await?.len();
        info!(local = %local.display(), %uri, size_bytes = size, "uploading to s3");

        self.cli
            .run([
                OsStr::new("s3"),
                OsStr::new("cp"),
                local.as_os_str(),
                OsStr::new(&uri),
                OsStr::new("--only-show-errors"),
            ])
            .await?;
        Ok(uri)
    }
}
