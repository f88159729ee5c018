//! Model fetching from a registry into a local directory.

use async_trait::async_trait;
use deploykit_artifacts::{list_artifact_files, verify_weights, FileFilter, HubClient};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Instrument};

use crate::clients::ModelRegistry;
use crate::error::{DeployError, Result};
use crate::model::{ArtifactSet, ModelRef};
use crate::obs::{stage_span, StageSpan};

#[async_trait]
impl ModelRegistry for HubClient {
    async fn list_files(&self, model: &ModelRef) -> Result<Vec<String>> {
        Ok(HubClient::list_files(self, model.id(), model.revision()).await?)
    }

    async fn download_file(
        &self,
        model: &ModelRef,
        path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        Ok(HubClient::download_file(self, model.id(), model.revision(), path, dest_dir).await?)
    }
}

/// Download the files of `model` that pass `filter` into `dest`.
///
/// Fails with `MissingWeights` before downloading anything when the
/// selection holds no `weight_suffix` file, and again afterwards if the
/// directory does not hold one.
pub async fn fetch_model(
    registry: &dyn ModelRegistry,
    model: &ModelRef,
    filter: &FileFilter,
    weight_suffix: &str,
    dest: &Path,
) -> Result<ArtifactSet> {
    fetch_selected(registry, model, filter, weight_suffix, dest)
        .instrument(stage_span("fetch"))
        .await
}

async fn fetch_selected(
    registry: &dyn ModelRegistry,
    model: &ModelRef,
    filter: &FileFilter,
    weight_suffix: &str,
    dest: &Path,
) -> Result<ArtifactSet> {
    let listing = registry.list_files(model).await?;
    let selected: Vec<String> = listing
        .into_iter()
        .filter(|path| filter.matches(path))
        .collect();
    debug!(model = %model, selected = selected.len(), "filtered repository listing");

    if !selected.iter().any(|p| p.ends_with(weight_suffix)) {
        return Err(DeployError::MissingWeights {
            dir: format!("{} (remote selection)", model),
            suffix: weight_suffix.to_string(),
        });
    }

    tokio::fs::create_dir_all(dest).await?;
    for path in &selected {
        registry.download_file(model, path, dest).await?;
    }

    let set = verify_artifacts(model, dest, weight_suffix)?;
    info!(
        model = %model,
        dir = %dest.display(),
        files = set.files.len(),
        weights = set.weights.len(),
        "model fetched"
    );
    Ok(set)
}

/// Build an [`ArtifactSet`] from a pre-populated directory.
///
/// Fails with `MissingWeights` when no weight file is present.
pub fn verify_artifacts(model: &ModelRef, dir: &Path, weight_suffix: &str) -> Result<ArtifactSet> {
    let _span = StageSpan::enter("verify");
    let weights = verify_weights(dir, weight_suffix)?;
    let files = list_artifact_files(dir)?;
    Ok(ArtifactSet {
        model: model.clone(),
        root: dir.to_path_buf(),
        files,
        weights,
    })
}
