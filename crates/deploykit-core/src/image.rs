//! Serving image lookup for the Hugging Face text-generation container.
//!
//! Images live in per-region ECR registries owned by the platform. The
//! tag encodes the framework, server version, Python, CUDA and OS
//! versions, so it is looked up from a fixed table rather than built
//! from the version string alone.

use crate::clients::{ImageResolver, ImageUri};
use crate::error::{DeployError, Result};

/// Backend names accepted for the text-generation image.
pub const TGI_BACKENDS: [&str; 2] = ["huggingface", "tgi"];

const TGI_REPOSITORY: &str = "huggingface-pytorch-tgi-inference";
const DEFAULT_REGISTRY_ACCOUNT: &str = "763104351884";

/// Server version -> image tag, oldest first.
const TGI_TAGS: &[(&str, &str)] = &[
    ("0.6.0", "2.0.0-tgi0.6.0-gpu-py39-cu118-ubuntu20.04"),
    ("0.8.2", "2.0.0-tgi0.8.2-gpu-py39-cu118-ubuntu20.04"),
    ("0.9.3", "2.0.1-tgi0.9.3-gpu-py39-cu118-ubuntu20.04"),
    ("1.0.3", "2.0.1-tgi1.0.3-gpu-py39-cu118-ubuntu20.04"),
    ("1.1.0", "2.0.1-tgi1.1.0-gpu-py39-cu118-ubuntu20.04"),
    ("1.2.0", "2.1.1-tgi1.2.0-gpu-py310-cu121-ubuntu20.04"),
    ("1.3.1", "2.1.1-tgi1.3.1-gpu-py310-cu121-ubuntu20.04"),
    ("1.3.3", "2.1.1-tgi1.3.3-gpu-py310-cu121-ubuntu20.04"),
    ("1.4.0", "2.1.1-tgi1.4.0-gpu-py310-cu121-ubuntu20.04"),
    ("1.4.2", "2.1.1-tgi1.4.2-gpu-py310-cu121-ubuntu22.04"),
    ("1.4.5", "2.1.1-tgi1.4.5-gpu-py310-cu121-ubuntu22.04"),
    ("2.0.0", "2.1.1-tgi2.0.0-gpu-py310-cu121-ubuntu22.04"),
    ("2.0.2", "2.3.0-tgi2.0.2-gpu-py310-cu121-ubuntu22.04"),
];

/// Regions served from a registry account other than the default.
const REGION_ACCOUNTS: &[(&str, &str)] = &[
    ("af-south-1", "626614931356"),
    ("ap-east-1", "871362719292"),
    ("ca-west-1", "204538143572"),
    ("cn-north-1", "727897471807"),
    ("cn-northwest-1", "727897471807"),
    ("eu-south-1", "692866216735"),
    ("eu-south-2", "503227376785"),
    ("il-central-1", "780543022126"),
    ("me-central-1", "914824155844"),
    ("me-south-1", "217643126080"),
];

/// Static resolver for the text-generation serving image.
#[derive(Debug, Clone, Copy, Default)]
pub struct TgiImageResolver;

impl TgiImageResolver {
    pub fn new() -> Self {
        TgiImageResolver
    }

    /// Known server versions, oldest first.
    pub fn versions() -> impl Iterator<Item = &'static str> {
        TGI_TAGS.iter().map(|(v, _)| *v)
    }

    /// Newest known server version.
    pub fn latest() -> &'static str {
        TGI_TAGS.last().map(|(v, _)| *v).unwrap_or("2.0.2")
    }

    fn tag_for(version: &str) -> Option<&'static str> {
        let version = version.trim_start_matches('v');
        let version = if version == "latest" {
            Self::latest()
        } else {
            version
        };

        if let Some((_, tag)) = TGI_TAGS.iter().find(|(v, _)| *v == version) {
            return Some(*tag);
        }

        // "1.4" selects the newest 1.4.x patch release
        let prefix = format!("{version}.");
        TGI_TAGS
            .iter()
            .rev()
            .find(|(v, _)| v.starts_with(&prefix))
            .map(|(_, tag)| *tag)
    }
}

impl ImageResolver for TgiImageResolver {
    fn resolve(&self, backend: &str, version: &str, region: &str) -> Result<ImageUri> {
        if !TGI_BACKENDS.contains(&backend.to_ascii_lowercase().as_str()) {
            return Err(DeployError::UnknownImage(format!(
                "unsupported backend '{backend}' (expected one of {})",
                TGI_BACKENDS.join(", ")
            )));
        }
        if region.is_empty() {
            return Err(DeployError::UnknownImage("region is empty".to_string()));
        }

        let tag = Self::tag_for(version).ok_or_else(|| {
            DeployError::UnknownImage(format!(
                "no {backend} image for version '{version}' (known: {})",
                Self::versions().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let account = REGION_ACCOUNTS
            .iter()
            .find(|(r, _)| *r == region)
            .map(|(_, a)| *a)
            .unwrap_or(DEFAULT_REGISTRY_ACCOUNT);
        let domain = if region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };

        Ok(ImageUri(format!(
            "{account}.dkr.ecr.{region}.{domain}/{TGI_REPOSITORY}:{tag}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_exact_version() {
        let uri = TgiImageResolver::new()
            .resolve("huggingface", "1.1.0", "us-east-1")
            .unwrap();
        assert_eq!(
            uri.as_str(),
            "763104351884.dkr.ecr.us-east-1.amazonaws.com/huggingface-pytorch-tgi-inference:2.0.1-tgi1.1.0-gpu-py39-cu118-ubuntu20.04"
        );
    }

    #[test]
    fn test_minor_version_picks_newest_patch() {
        let uri = TgiImageResolver::new()
            .resolve("tgi", "1.4", "eu-west-1")
            .unwrap();
        assert!(uri.as_str().ends_with("tgi1.4.5-gpu-py310-cu121-ubuntu22.04"));
    }

    #[test]
    fn test_latest_alias() {
        let uri = TgiImageResolver::new()
            .resolve("huggingface", "latest", "us-west-2")
            .unwrap();
        assert!(uri.as_str().contains(&format!("tgi{}", TgiImageResolver::latest())));
    }

    #[test]
    fn test_region_specific_account_and_domain() {
        let uri = TgiImageResolver::new()
            .resolve("huggingface", "1.0.3", "cn-north-1")
            .unwrap();
        assert!(uri
            .as_str()
            .starts_with("727897471807.dkr.ecr.cn-north-1.amazonaws.com.cn/"));
    }

    #[test]
    fn test_unknown_backend_and_version() {
        let resolver = TgiImageResolver::new();
        assert!(matches!(
            resolver.resolve("onnx", "1.0.3", "us-east-1"),
            Err(DeployError::UnknownImage(_))
        ));
        assert!(matches!(
            resolver.resolve("huggingface", "9.9.9", "us-east-1"),
            Err(DeployError::UnknownImage(_))
        ));
    }
}
