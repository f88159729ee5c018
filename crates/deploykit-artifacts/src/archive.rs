//! Flat `.tar.gz` packaging of model directories.
//!
//! The serving platform unpacks the archive straight into the model
//! directory, so every entry must sit at the archive root: names are
//! relative to the artifact directory, with no enclosing folder and no
//! `./` prefix. Multi-gigabyte weight sets are compressed with `pigz`
//! when it is installed; otherwise the archive is written in-process.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::weights::list_artifact_files;
use crate::Result;

/// Compression backend used to write the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveBackend {
    /// `tar` piping through the multi-threaded `pigz` compressor
    Pigz,
    /// In-process `tar` + `flate2` (single-threaded gzip)
    Builtin,
}

impl std::fmt::Display for ArchiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveBackend::Pigz => write!(f, "pigz"),
            ArchiveBackend::Builtin => write!(f, "builtin"),
        }
    }
}

/// Result of packing a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutput {
    /// Path of the written archive
    pub path: PathBuf,
    /// Entries written, relative to the archive root
    pub entries: Vec<PathBuf>,
    /// Archive size on disk
    pub size_bytes: u64,
    /// SHA-256 of the archive bytes (hex)
    pub sha256: String,
    /// Backend that produced the archive
    pub backend: ArchiveBackend,
}

impl ArchiveOutput {
    /// Short digest (first 12 hex chars)
    pub fn short_digest(&self) -> &str {
        &self.sha256[..12.min(self.sha256.len())]
    }
}

/// Packs artifact directories into flat gzip tarballs
#[derive(Debug, Clone)]
pub struct Archiver {
    backend: ArchiveBackend,
    compressor: String,
}

impl Archiver {
    pub fn new(backend: ArchiveBackend) -> Self {
        Archiver {
            backend,
            compressor: "pigz".to_string(),
        }
    }

    /// Use a different program for the `Pigz` backend (must read stdin
    /// and write gzip to stdout like `pigz`).
    pub fn with_compressor(mut self, program: impl Into<String>) -> Self {
        self.compressor = program.into();
        self
    }

    /// Prefer `pigz` when both it and `tar` are on PATH.
    pub fn detect() -> Self {
        let backend = if crate::is_pigz_available() && crate::is_tar_available() {
            ArchiveBackend::Pigz
        } else {
            ArchiveBackend::Builtin
        };
        debug!(%backend, "selected archive backend");
        Archiver::new(backend)
    }

    pub fn backend(&self) -> ArchiveBackend {
        self.backend
    }

    /// Pack every file below `src_dir` into `output`.
    ///
    /// If `output` lies inside `src_dir` it is left out of the entry list.
    pub async fn archive(&self, src_dir: &Path, output: &Path) -> Result<ArchiveOutput> {
        let started = Instant::now();
        let output = absolute(output)?;

        let mut entries = list_artifact_files(src_dir)?;
        if let Ok(inside) = output.strip_prefix(absolute(src_dir)?) {
            entries.retain(|e| e != inside);
        }
        if entries.is_empty() {
            return Err(ArtifactError::EmptyArtifactDir(
                src_dir.display().to_string(),
            ));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            src = %src_dir.display(),
            output = %output.display(),
            entries = entries.len(),
            backend = %self.backend,
            "packing model artifacts"
        );

        match self.backend {
            ArchiveBackend::Pigz => {
                archive_pigz(&self.compressor, src_dir, &output, &entries).await?
            }
            ArchiveBackend::Builtin => {
                let src = src_dir.to_path_buf();
                let out = output.clone();
                let names = entries.clone();
                spawn_blocking(move || archive_builtin(&src, &out, &names))
                    .await
                    .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))??
            }
        }

        let digest_path = output.clone();
        let (size_bytes, sha256) = spawn_blocking(move || file_digest(&digest_path))
            .await
            .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))??;

        info!(
            output = %output.display(),
            size_bytes,
            sha256 = %&sha256[..12],
            duration_ms = started.elapsed().as_millis() as u64,
            "archive written"
        );

        Ok(ArchiveOutput {
            path: output,
            entries,
            size_bytes,
            sha256,
            backend: self.backend,
        })
    }
}

impl Default for Archiver {
    fn default() -> Self {
        Self::detect()
    }
}

async fn archive_pigz(
    compressor: &str,
    src_dir: &Path,
    output: &Path,
    entries: &[PathBuf],
) -> Result<()> {
    // -h stores symlinked weights (hub cache layout) as regular files,
    // matching the builtin backend.
    let mut cmd = Command::new("tar");
    cmd.arg(format!("--use-compress-program={compressor}"))
        .arg("-h")
        .arg("-cf")
        .arg(output)
        .arg("-C")
        .arg(src_dir)
        .arg("--")
        .args(entries)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let out = cmd.output().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ArtifactError::ToolNotFound("tar".to_string()),
        _ => ArtifactError::Io(e),
    })?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(ArtifactError::CommandFailed {
            tool: format!("tar --use-compress-program={compressor}"),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(())
}

fn archive_builtin(src_dir: &Path, output: &Path, entries: &[PathBuf]) -> Result<()> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);

    for name in entries {
        builder.append_path_with_name(src_dir.join(name), name)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn file_digest(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// List the non-directory entries of a `.tar.gz`, in archive order.
///
/// Symlinks and other special entries are listed too; use
/// [`list_archive_entry_types`] to tell them apart.
pub fn list_archive_entries(archive: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_archive_entry_types(archive)?
        .into_iter()
        .map(|(path, _)| path)
        .collect())
}

/// Non-directory entries of a `.tar.gz` with their tar entry type.
pub fn list_archive_entry_types(archive: &Path) -> Result<Vec<(PathBuf, tar::EntryType)>> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));

    let mut entries = Vec::new();
    for entry in tarball.entries()? {
        let entry = entry?;
        let kind = entry.header().entry_type();
        if !kind.is_dir() {
            entries.push((entry.path()?.into_owned(), kind));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(dir: &Path) {
        std::fs::write(dir.join("config.json"), r#"{"model_type":"llama"}"#).unwrap();
        std::fs::write(dir.join("model.safetensors"), vec![7u8; 4096]).unwrap();
        std::fs::write(dir.join("tokenizer.json"), "{}").unwrap();
    }

    #[tokio::test]
    async fn test_builtin_archive_is_flat() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        populate(src.path());

        let archiver = Archiver::new(ArchiveBackend::Builtin);
        let result = archiver
            .archive(src.path(), &out.path().join("model.tar.gz"))
            .await
            .unwrap();

        let mut listed = list_archive_entries(&result.path).unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("config.json"),
                PathBuf::from("model.safetensors"),
                PathBuf::from("tokenizer.json"),
            ]
        );
        assert_eq!(result.entries, listed);
        assert_eq!(result.backend, ArchiveBackend::Builtin);
    }

    #[tokio::test]
    async fn test_output_inside_source_is_excluded() {
        let src = tempdir().unwrap();
        populate(src.path());
        let output = src.path().join("model.tar.gz");
        std::fs::write(&output, b"stale").unwrap();

        let archiver = Archiver::new(ArchiveBackend::Builtin);
        let result = archiver.archive(src.path(), &output).await.unwrap();

        let listed = list_archive_entries(&result.path).unwrap();
        assert!(!listed.contains(&PathBuf::from("model.tar.gz")));
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_directory_rejected() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();

        let err = Archiver::new(ArchiveBackend::Builtin)
            .archive(src.path(), &out.path().join("model.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::EmptyArtifactDir(_)));
    }

    #[cfg(unix)]
    fn gzip_shim(dir: &Path) -> Option<String> {
        use std::os::unix::fs::PermissionsExt;

        let gzip_ok = std::process::Command::new("gzip")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !gzip_ok || !crate::is_tar_available() {
            return None;
        }
        let shim = dir.join("fake-pigz");
        std::fs::write(&shim, "#!/bin/sh\nexec gzip \"$@\"\n").unwrap();
        std::fs::set_permissions(&shim, std::fs::Permissions::from_mode(0o755)).unwrap();
        Some(shim.display().to_string())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pigz_backend_stores_symlinked_weights_as_files() {
        let tools = tempdir().unwrap();
        let Some(shim) = gzip_shim(tools.path()) else {
            return;
        };

        let blobs = tempdir().unwrap();
        let blob = blobs.path().join("blob-7f3a");
        std::fs::write(&blob, vec![9u8; 64]).unwrap();

        let src = tempdir().unwrap();
        std::fs::write(src.path().join("config.json"), "{}").unwrap();
        std::os::unix::fs::symlink(&blob, src.path().join("model.safetensors")).unwrap();

        let out = tempdir().unwrap();
        let result = Archiver::new(ArchiveBackend::Pigz)
            .with_compressor(shim)
            .archive(src.path(), &out.path().join("model.tar.gz"))
            .await
            .unwrap();
        assert_eq!(result.backend, ArchiveBackend::Pigz);

        let mut listed = list_archive_entry_types(&result.path).unwrap();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            listed,
            vec![
                (PathBuf::from("config.json"), tar::EntryType::Regular),
                (PathBuf::from("model.safetensors"), tar::EntryType::Regular),
            ]
        );

        let unpacked = tempdir().unwrap();
        let file = File::open(&result.path).unwrap();
        tar::Archive::new(GzDecoder::new(file))
            .unpack(unpacked.path())
            .unwrap();
        assert_eq!(
            std::fs::read(unpacked.path().join("model.safetensors")).unwrap(),
            vec![9u8; 64]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_builtin_backend_stores_symlinked_weights_as_files() {
        let blobs = tempdir().unwrap();
        let blob = blobs.path().join("blob-7f3a");
        std::fs::write(&blob, vec![9u8; 64]).unwrap();

        let src = tempdir().unwrap();
        std::os::unix::fs::symlink(&blob, src.path().join("model.safetensors")).unwrap();

        let out = tempdir().unwrap();
        let result = Archiver::new(ArchiveBackend::Builtin)
            .archive(src.path(), &out.path().join("model.tar.gz"))
            .await
            .unwrap();

        assert_eq!(
            list_archive_entry_types(&result.path).unwrap(),
            vec![(PathBuf::from("model.safetensors"), tar::EntryType::Regular)]
        );
    }

    #[test]
    fn test_symlink_entries_are_listed() {
        let out = tempdir().unwrap();
        let path = out.path().join("links.tar.gz");
        {
            let file = File::create(&path).unwrap();
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "model.safetensors", "/blobs/7f3a")
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        assert_eq!(
            list_archive_entries(&path).unwrap(),
            vec![PathBuf::from("model.safetensors")]
        );
        assert_eq!(
            list_archive_entry_types(&path).unwrap()[0].1,
            tar::EntryType::Symlink
        );
    }

    #[tokio::test]
    async fn test_digest_matches_file_contents() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        populate(src.path());

        let result = Archiver::new(ArchiveBackend::Builtin)
            .archive(src.path(), &out.path().join("model.tar.gz"))
            .await
            .unwrap();

        let bytes = std::fs::read(&result.path).unwrap();
        let expected = hex::encode(Sha256::digest(&bytes));
        assert_eq!(result.sha256, expected);
        assert_eq!(result.size_bytes, bytes.len() as u64);
        assert_eq!(result.short_digest().len(), 12);
    }
}
