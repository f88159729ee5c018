//! deploykit-artifacts: model artifact handling for deploykit
//!
//! This crate provides the local artifact layer of the deployment
//! workflow. It downloads model files from a Hugging Face style hub,
//! checks that serialized weights are present, and packs the files into
//! a flat `.tar.gz` archive ready for upload.
//!
//! ## Layer 1 - Artifacts
//!
//! Focus: correct file selection and archive layout.

pub mod archive;
pub mod error;
pub mod filter;
pub mod hub;
pub mod weights;

pub use archive::{
    list_archive_entries, list_archive_entry_types, ArchiveBackend, ArchiveOutput, Archiver,
};
pub use error::ArtifactError;
pub use filter::FileFilter;
pub use hub::{HubClient, HubConfig, RepoInfo, RepoSibling};
pub use weights::{find_weight_files, list_artifact_files, verify_weights, DEFAULT_WEIGHT_SUFFIX};

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Check if the `pigz` parallel compressor is available
pub fn is_pigz_available() -> bool {
    std::process::Command::new("pigz")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check if GNU/BSD `tar` is available
pub fn is_tar_available() -> bool {
    std::process::Command::new("tar")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
