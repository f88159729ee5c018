//! Artifact directory listing and weight verification
//!
//! A model directory is only worth archiving when it holds serialized
//! weights in the format the serving container expects. These helpers
//! walk the directory deterministically and fail fast otherwise.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ArtifactError;
use crate::Result;

/// Weight serialization expected by the serving container
pub const DEFAULT_WEIGHT_SUFFIX: &str = ".safetensors";

/// List every regular file below `dir`, as sorted paths relative to `dir`.
///
/// Hidden entries (names starting with `.`) are skipped, which drops hub
/// download caches and VCS metadata.
pub fn list_artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ArtifactError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("artifact directory not found: {}", dir.display()),
        )));
    }

    let mut files = Vec::new();
    collect_files_recursive(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_recursive(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        // Symlinked files (hub cache layout) count; symlinked directories do not
        let is_file = file_type.is_file()
            || (file_type.is_symlink()
                && std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false));
        if file_type.is_dir() {
            collect_files_recursive(root, &path, files)?;
        } else if is_file {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            files.push(relative);
        }
    }

    Ok(())
}

/// Find weight files with the given suffix below `dir`.
pub fn find_weight_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let weights: Vec<PathBuf> = list_artifact_files(dir)?
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect();

    debug!(dir = %dir.display(), suffix, count = weights.len(), "scanned for weight files");
    Ok(weights)
}

/// Require at least one weight file with `suffix` below `dir`.
///
/// Returns the weight files found so callers can report them.
pub fn verify_weights(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let weights = find_weight_files(dir, suffix)?;
    if weights.is_empty() {
        return Err(ArtifactError::MissingWeights {
            dir: dir.display().to_string(),
            suffix: suffix.to_string(),
        });
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_artifact_files_sorted_and_relative() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("1_Pooling")).unwrap();
        std::fs::write(dir.path().join("1_Pooling/config.json"), "{}").unwrap();

        let files = list_artifact_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("1_Pooling/config.json"),
                PathBuf::from("config.json"),
                PathBuf::from("tokenizer.json"),
            ]
        );
    }

    #[test]
    fn test_skips_hidden_entries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), "w").unwrap();
        std::fs::write(dir.path().join(".gitattributes"), "*").unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join(".cache/lock"), "").unwrap();

        let files = list_artifact_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("model.safetensors")]);
    }

    #[test]
    fn test_verify_weights_empty_dir_fails() {
        let dir = tempdir().unwrap();
        let err = verify_weights(dir.path(), DEFAULT_WEIGHT_SUFFIX).unwrap_err();
        assert!(matches!(err, ArtifactError::MissingWeights { .. }));
    }

    #[test]
    fn test_verify_weights_mismatched_format_fails() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pytorch_model.bin"), "w").unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();

        let err = verify_weights(dir.path(), DEFAULT_WEIGHT_SUFFIX).unwrap_err();
        assert!(err.to_string().contains(".safetensors"));
    }

    #[test]
    fn test_verify_weights_returns_shards() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model-00001-of-00002.safetensors"), "a").unwrap();
        std::fs::write(dir.path().join("model-00002-of-00002.safetensors"), "b").unwrap();
        std::fs::write(dir.path().join("model.safetensors.index.json"), "{}").unwrap();

        let weights = verify_weights(dir.path(), DEFAULT_WEIGHT_SUFFIX).unwrap();
        assert_eq!(weights.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_weights_are_listed() {
        let blobs = tempdir().unwrap();
        let dir = tempdir().unwrap();
        std::fs::write(blobs.path().join("abc123"), "w").unwrap();
        std::os::unix::fs::symlink(
            blobs.path().join("abc123"),
            dir.path().join("model.safetensors"),
        )
        .unwrap();
        std::os::unix::fs::symlink(blobs.path(), dir.path().join("linked-dir")).unwrap();

        let files = list_artifact_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("model.safetensors")]);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let err = list_artifact_files(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io(_)));
    }
}
