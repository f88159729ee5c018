//! Artifact upload to the object store.

use std::path::Path;
use tracing::{info, Instrument};

use crate::clients::ObjectStore;
use crate::error::{DeployError, Result};
use crate::model::ModelRef;
use crate::obs::stage_span;

/// Object URI the archive of `model` is uploaded to:
/// `s3://<bucket>[/<prefix>]/<short name>`.
pub fn artifact_destination(bucket: &str, prefix: Option<&str>, model: &ModelRef) -> Result<String> {
    let bucket = bucket.trim().trim_start_matches("s3://").trim_matches('/');
    if bucket.is_empty() {
        return Err(DeployError::InvalidConfig("bucket name is empty".to_string()));
    }

    let prefix = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
    Ok(match prefix {
        Some(prefix) => format!("s3://{}/{}/{}", bucket, prefix, model.short_name()),
        None => format!("s3://{}/{}", bucket, model.short_name()),
    })
}

/// Upload an archive and return its resolved URI.
pub async fn upload_artifact(
    store: &dyn ObjectStore,
    archive: &Path,
    destination: &str,
) -> Result<String> {
    async {
        let uri = store.upload(archive, destination).await?;
        info!(archive = %archive.display(), %uri, "artifact uploaded");
        Ok::<_, DeployError>(uri)
    }
    .instrument(stage_span("upload"))
    .await
}
