//! Model identity and fetched artifact sets.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

/// Revision used when none is given.
pub const DEFAULT_REVISION: &str = "main";

/// A model in the registry, pinned to a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    id: String,
    revision: String,
}

impl ModelRef {
    /// Validate and build a model reference.
    ///
    /// `id` is `owner/name` or a bare `name`; whitespace and empty path
    /// segments are rejected.
    pub fn new(id: &str, revision: Option<&str>) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DeployError::InvalidModelRef("model id is empty".to_string()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(DeployError::InvalidModelRef(format!(
                "model id contains whitespace: '{id}'"
            )));
        }
        if id.split('/').any(str::is_empty) || id.split('/').count() > 2 {
            return Err(DeployError::InvalidModelRef(format!(
                "expected 'owner/name', got '{id}'"
            )));
        }

        let revision = revision
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVISION);

        Ok(ModelRef {
            id: id.to_string(),
            revision: revision.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Final segment of the id (`example/model` -> `model`).
    pub fn short_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.revision)
    }
}

/// Files fetched for a model into a local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub model: ModelRef,
    /// Local directory holding the files
    pub root: PathBuf,
    /// All files, relative to `root`, sorted
    pub files: Vec<PathBuf>,
    /// Weight files, relative to `root`
    pub weights: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ref_defaults_revision() {
        let model = ModelRef::new("example/model", None).unwrap();
        assert_eq!(model.revision(), "main");
        assert_eq!(model.short_name(), "model");
        assert_eq!(model.to_string(), "example/model@main");
    }

    #[test]
    fn test_model_ref_bare_name() {
        let model = ModelRef::new("gpt2", Some("v1.0")).unwrap();
        assert_eq!(model.short_name(), "gpt2");
        assert_eq!(model.revision(), "v1.0");
    }

    #[test]
    fn test_blank_revision_falls_back_to_main() {
        let model = ModelRef::new("example/model", Some("  ")).unwrap();
        assert_eq!(model.revision(), DEFAULT_REVISION);
    }

    #[test]
    fn test_model_ref_rejects_malformed_ids() {
        for bad in ["", "   ", "owner/", "/name", "a/b/c", "owner/na me"] {
            assert!(
                matches!(ModelRef::new(bad, None), Err(DeployError::InvalidModelRef(_))),
                "expected rejection for {bad:?}"
            );
        }
    }
}
