//! Sequential driver for the package-and-deploy workflow.
//!
//! session -> fetch -> archive -> upload -> image -> config -> deploy,
//! then optional sample generations and teardown. Each step blocks until
//! done; the first error stops the run.

use chrono::Utc;
use deploykit_artifacts::{ArchiveOutput, Archiver, FileFilter, DEFAULT_WEIGHT_SUFFIX};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, Instrument};

use crate::clients::{
    DeployRequest, EndpointHandle, ImageResolver, ImageUri, InferencePlatform, ModelRegistry,
    ObjectStore, Session, SessionProvider,
};
use crate::deploy::{
    deploy_endpoint, plan_deployment, InstanceSpec, DEFAULT_HEALTH_CHECK_TIMEOUT,
};
use crate::deploy_config::{DeploymentConfig, ModelSource, Quantization};
use crate::error::{DeployError, Result};
use crate::fetch::fetch_model;
use crate::model::{ArtifactSet, ModelRef};
use crate::obs::{
    emit_endpoint_left_running, emit_endpoint_ready, emit_stage_finished, emit_stage_started,
    stage_span,
};
use crate::predict::{generate, GenerationParameters};
use crate::teardown::{teardown, TeardownReport};
use crate::upload::{artifact_destination, upload_artifact};

/// What to do with a live or half-provisioned endpoint when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Leave it running and warn (the endpoint keeps billing)
    #[default]
    LeaveRunning,
    /// Tear it down before returning the error
    Teardown,
}

/// Inputs of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub model: ModelRef,
    pub filter: FileFilter,
    pub weight_suffix: String,
    /// Scratch directory for downloaded files and the archive
    pub work_dir: PathBuf,
    pub archiver: Archiver,
    pub key_prefix: Option<String>,
    pub backend: String,
    pub backend_version: String,
    /// Skip image resolution and use this image
    pub image_override: Option<ImageUri>,
    pub instance: InstanceSpec,
    pub num_gpus: u32,
    pub max_input_length: u32,
    pub max_total_tokens: u32,
    pub quantize: Option<Quantization>,
    pub health_check_timeout: Duration,
}

impl WorkflowOptions {
    pub fn new(model: ModelRef, work_dir: impl Into<PathBuf>) -> Self {
        WorkflowOptions {
            model,
            filter: FileFilter::allow_all(),
            weight_suffix: DEFAULT_WEIGHT_SUFFIX.to_string(),
            work_dir: work_dir.into(),
            archiver: Archiver::detect(),
            key_prefix: None,
            backend: "huggingface".to_string(),
            backend_version: "latest".to_string(),
            image_override: None,
            instance: InstanceSpec::default(),
            num_gpus: 1,
            max_input_length: 2048,
            max_total_tokens: 4096,
            quantize: None,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }

    /// Local directory the model files are fetched into.
    pub fn model_dir(&self) -> PathBuf {
        self.work_dir.join(self.model.short_name())
    }

    /// Local archive path (outside the model directory).
    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join("model.tar.gz")
    }

    /// Container environment for a model served from the uploaded archive.
    pub fn deployment_config(&self) -> Result<DeploymentConfig> {
        DeploymentConfig::builder(ModelSource::Archive)
            .num_gpus(self.num_gpus)
            .max_input_length(self.max_input_length)
            .max_total_tokens(self.max_total_tokens)
            .quantize(self.quantize)
            .build()
    }
}

/// A fetched, packed and uploaded model.
#[derive(Debug, Clone)]
pub struct PreparedArtifact {
    pub session: Session,
    pub artifacts: ArtifactSet,
    pub archive: ArchiveOutput,
    pub model_data_uri: String,
}

/// A provisioned endpoint and the request that created it.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub endpoint: EndpointHandle,
    pub request: DeployRequest,
}

/// One prompt and the text generated for it.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub prompt: String,
    pub text: String,
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub model_data_uri: String,
    pub image: ImageUri,
    pub endpoint: EndpointHandle,
    pub completions: Vec<Completion>,
    pub teardown: TeardownReport,
}

/// The external clients one run talks to.
pub struct Workflow<'a> {
    pub session: &'a dyn SessionProvider,
    pub registry: &'a dyn ModelRegistry,
    pub store: &'a dyn ObjectStore,
    pub images: &'a dyn ImageResolver,
    pub platform: &'a dyn InferencePlatform,
    run_id: String,
}

impl<'a> Workflow<'a> {
    pub fn new(
        session: &'a dyn SessionProvider,
        registry: &'a dyn ModelRegistry,
        store: &'a dyn ObjectStore,
        images: &'a dyn ImageResolver,
        platform: &'a dyn InferencePlatform,
    ) -> Self {
        Workflow {
            session,
            registry,
            store,
            images,
            platform,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Resolve the session, fetch, archive and upload the model.
    pub async fn prepare(&self, opts: &WorkflowOptions) -> Result<PreparedArtifact> {
        let session = self.stage("session", self.session.resolve()).await?;
        info!(
            region = %session.region,
            role = %session.role_arn,
            bucket = %session.default_bucket,
            "session resolved"
        );

        let model_dir = opts.model_dir();
        let artifacts = self
            .stage(
                "fetch",
                fetch_model(
                    self.registry,
                    &opts.model,
                    &opts.filter,
                    &opts.weight_suffix,
                    &model_dir,
                ),
            )
            .await?;

        let archive_path = opts.archive_path();
        let archive = self
            .stage("archive", async {
                Ok(opts
                    .archiver
                    .archive(&model_dir, &archive_path)
                    .instrument(stage_span("archive"))
                    .await?)
            })
            .await?;

        let destination = artifact_destination(
            &session.default_bucket,
            opts.key_prefix.as_deref(),
            &opts.model,
        )?;
        let model_data_uri = self
            .stage(
                "upload",
                upload_artifact(self.store, &archive.path, &destination),
            )
            .await?;

        Ok(PreparedArtifact {
            session,
            artifacts,
            archive,
            model_data_uri,
        })
    }

    /// Resolve the image, build the configuration and provision the endpoint.
    ///
    /// If provisioning fails or times out after the resources were
    /// created, `on_error` decides whether they are deleted or left behind.
    pub async fn deploy(
        &self,
        opts: &WorkflowOptions,
        prepared: &PreparedArtifact,
        on_error: CleanupPolicy,
    ) -> Result<Deployment> {
        let image = match &opts.image_override {
            Some(image) => image.clone(),
            None => self.images.resolve(
                &opts.backend,
                &opts.backend_version,
                &prepared.session.region,
            )?,
        };
        info!(%image, "serving image resolved");

        let config = opts.deployment_config()?;
        let request = plan_deployment(
            &prepared.session,
            &opts.model,
            image,
            &prepared.model_data_uri,
            config,
            &opts.instance,
            opts.health_check_timeout,
            Utc::now(),
        )?;

        let started = Instant::now();
        let endpoint = match self
            .stage("deploy", deploy_endpoint(self.platform, &request))
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if e.leaves_endpoint() {
                    let partial = EndpointHandle::new(
                        request.endpoint_name.clone(),
                        request.model_name.clone(),
                    );
                    self.release(&partial, on_error, &e).await;
                }
                return Err(e);
            }
        };
        emit_endpoint_ready(
            &self.run_id,
            &endpoint.endpoint_name,
            started.elapsed().as_millis() as u64,
        );

        Ok(Deployment { endpoint, request })
    }

    /// Full run: prepare, deploy, generate for each prompt, tear down.
    ///
    /// Teardown always runs after successful generations. When
    /// provisioning or a generation fails, `on_error` decides whether the
    /// endpoint is torn down or left running.
    pub async fn run(
        &self,
        opts: &WorkflowOptions,
        prompts: &[String],
        params: &GenerationParameters,
        on_error: CleanupPolicy,
    ) -> Result<RunReport> {
        let prepared = self.prepare(opts).await?;
        let deployment = self.deploy(opts, &prepared, on_error).await?;
        let endpoint = deployment.endpoint.clone();

        let completions = match self.sample(&endpoint, prompts, params).await {
            Ok(completions) => completions,
            Err(e) => {
                self.release(&endpoint, on_error, &e).await;
                return Err(e);
            }
        };

        let cleanup = teardown(self.platform, &endpoint).await;

        Ok(RunReport {
            run_id: self.run_id.clone(),
            model_data_uri: prepared.model_data_uri,
            image: deployment.request.image,
            endpoint,
            completions,
            teardown: cleanup,
        })
    }

    async fn release(
        &self,
        endpoint: &EndpointHandle,
        policy: CleanupPolicy,
        error: &DeployError,
    ) {
        match policy {
            CleanupPolicy::Teardown => {
                let report = teardown(self.platform, endpoint).await;
                if !report.is_complete() {
                    emit_endpoint_left_running(&self.run_id, &endpoint.endpoint_name, error);
                }
            }
            CleanupPolicy::LeaveRunning => {
                emit_endpoint_left_running(&self.run_id, &endpoint.endpoint_name, error);
            }
        }
    }

    async fn sample(
        &self,
        endpoint: &EndpointHandle,
        prompts: &[String],
        params: &GenerationParameters,
    ) -> Result<Vec<Completion>> {
        let mut completions = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let text = self
                .stage("predict", generate(self.platform, endpoint, prompt, params))
                .await?;
            completions.push(Completion {
                prompt: prompt.clone(),
                text,
            });
        }
        Ok(completions)
    }

    async fn stage<T, F>(&self, stage: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        emit_stage_started(&self.run_id, stage);
        let started = Instant::now();
        let result = fut.await;
        emit_stage_finished(
            &self.run_id,
            stage,
            started.elapsed().as_millis() as u64,
            result.is_ok(),
        );
        result
    }
}
