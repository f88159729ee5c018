//! deploykit Core Library
//!
//! Client traits, deployment configuration and the sequential workflow
//! that packages a hub model and serves it from a managed endpoint.

pub mod clients;
pub mod deploy;
pub mod deploy_config;
pub mod error;
pub mod fakes;
pub mod fetch;
pub mod image;
pub mod model;
pub mod obs;
pub mod pipeline;
pub mod predict;
pub mod settings;
pub mod teardown;
pub mod telemetry;
pub mod upload;

pub use clients::{
    DeployRequest, EndpointHandle, ImageResolver, ImageUri, InferencePlatform, ModelRegistry,
    ObjectStore, Session, SessionProvider,
};
pub use deploy::{
    deploy_endpoint, plan_deployment, resource_name, InstanceSpec, DEFAULT_HEALTH_CHECK_TIMEOUT,
    DEFAULT_INSTANCE_TYPE,
};
pub use deploy_config::{DeploymentConfig, DeploymentConfigBuilder, ModelSource, Quantization};
pub use error::{DeployError, Result};
pub use fetch::{fetch_model, verify_artifacts};
pub use image::TgiImageResolver;
pub use model::{ArtifactSet, ModelRef, DEFAULT_REVISION};
pub use pipeline::{
    CleanupPolicy, Completion, Deployment, PreparedArtifact, RunReport, Workflow, WorkflowOptions,
};
pub use predict::{build_payload, first_generated_text, generate, GenerationParameters};
pub use settings::{Settings, DEFAULT_ROLE_NAME};
pub use teardown::{teardown, TeardownReport};
pub use telemetry::init_tracing;
pub use upload::{artifact_destination, upload_artifact};

pub use deploykit_artifacts::{
    ArchiveBackend, ArchiveOutput, Archiver, FileFilter, HubClient, HubConfig,
    DEFAULT_WEIGHT_SUFFIX,
};

/// Crate version, reported by the CLI and in the hub user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
