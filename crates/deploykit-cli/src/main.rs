//! deploykit - package Hugging Face models and serve them from SageMaker
//!
//! The `deploykit` command runs the deployment workflow end to end or one
//! step at a time.
//!
//! ## Commands
//!
//! - `fetch`: Download model files from the hub
//! - `package`: Verify weights and build the flat `.tar.gz`
//! - `upload`: Copy an archive to the artifact bucket
//! - `image`: Resolve the serving container image
//! - `config`: Print the container environment
//! - `deploy`: Create an endpoint from an uploaded archive
//! - `predict`: Send a prompt to an endpoint
//! - `teardown`: Delete an endpoint and its model
//! - `run`: All of the above, then teardown
//! - `env`: Show tool availability and settings

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};

use deploykit_artifacts::{is_pigz_available, is_tar_available};
use deploykit_aws::{is_aws_cli_available, AwsCli, AwsSession, S3Store, SageMakerPlatform};
use deploykit_core::{
    artifact_destination, deploy_endpoint, fetch_model, generate, plan_deployment, teardown,
    upload_artifact, verify_artifacts, ArchiveBackend, Archiver, CleanupPolicy, DeploymentConfig,
    EndpointHandle, FileFilter, GenerationParameters, HubClient, ImageResolver, ImageUri,
    InstanceSpec, ModelRef, ModelSource, Quantization, SessionProvider, Settings,
    TgiImageResolver, Workflow, WorkflowOptions, DEFAULT_INSTANCE_TYPE, DEFAULT_WEIGHT_SUFFIX,
};

#[derive(Parser)]
#[command(name = "deploykit")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package hub models and deploy them to managed inference endpoints", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Cloud region
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Named credentials profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download model files from the hub
    Fetch {
        #[command(flatten)]
        model: ModelArgs,

        /// Destination directory
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Verify weights and pack a directory into a flat .tar.gz
    Package {
        /// Directory holding the model files
        dir: PathBuf,

        /// Archive path
        #[arg(short, long, default_value = "model.tar.gz")]
        output: PathBuf,

        /// Suffix identifying weight files
        #[arg(long, default_value = DEFAULT_WEIGHT_SUFFIX)]
        weight_suffix: String,

        /// Use the in-process compressor even when pigz is installed
        #[arg(long)]
        builtin: bool,
    },

    /// Upload an archive to the artifact bucket
    Upload {
        /// Archive to upload
        archive: PathBuf,

        /// Model the archive belongs to (names the object key)
        #[arg(short, long)]
        model: String,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Resolve the serving container image
    Image {
        /// Serving backend
        #[arg(long, default_value = "huggingface")]
        backend: String,

        /// Backend version, or "latest"
        #[arg(long, default_value = "latest")]
        backend_version: String,

        /// List known versions instead
        #[arg(long)]
        list: bool,
    },

    /// Print the container environment as JSON
    Config {
        /// Hub model id to serve directly instead of the uploaded archive
        #[arg(long)]
        hub_model: Option<String>,

        #[command(flatten)]
        limits: LimitsArgs,
    },

    /// Create an endpoint from an uploaded archive and wait until it serves
    Deploy {
        /// Model id (names the endpoint)
        #[arg(short, long)]
        model: String,

        /// Location of the uploaded archive
        #[arg(long)]
        model_data: String,

        #[command(flatten)]
        serving: ServingArgs,

        #[command(flatten)]
        limits: LimitsArgs,

        /// Execution role ARN
        #[arg(long, env = "SAGEMAKER_ROLE_ARN")]
        role_arn: Option<String>,
    },

    /// Send a prompt to an endpoint
    Predict {
        /// Endpoint name
        #[arg(short, long)]
        endpoint: String,

        /// Prompt text
        prompt: String,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Delete an endpoint and its model registration
    Teardown {
        /// Endpoint name
        #[arg(short, long)]
        endpoint: String,

        /// Model name (defaults to the endpoint name)
        #[arg(long)]
        model_name: Option<String>,
    },

    /// Fetch, package, upload, deploy, sample and tear down
    Run {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        storage: StorageArgs,

        #[command(flatten)]
        serving: ServingArgs,

        #[command(flatten)]
        limits: LimitsArgs,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Prompt to send once the endpoint serves (repeatable)
        #[arg(short, long = "prompt")]
        prompts: Vec<String>,

        /// Scratch directory (default: a temporary directory)
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Use the in-process compressor even when pigz is installed
        #[arg(long)]
        builtin: bool,

        /// Delete the endpoint when a step after deployment fails
        #[arg(long)]
        teardown_on_error: bool,
    },

    /// Show tool availability and settings
    Env,
}

#[derive(Args)]
struct ModelArgs {
    /// Model id, e.g. meta-llama/Llama-2-7b-chat-hf
    #[arg(short, long)]
    model: String,

    /// Revision (branch, tag or commit)
    #[arg(long, default_value = "main")]
    revision: String,

    /// Glob a file must match to be fetched (repeatable)
    #[arg(long = "allow")]
    allow: Vec<String>,

    /// Glob that excludes a file (repeatable)
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// Suffix identifying weight files
    #[arg(long, default_value = DEFAULT_WEIGHT_SUFFIX)]
    weight_suffix: String,
}

impl ModelArgs {
    fn model_ref(&self) -> Result<ModelRef> {
        Ok(ModelRef::new(&self.model, Some(&self.revision))?)
    }

    fn filter(&self) -> Result<FileFilter> {
        Ok(FileFilter::new(&self.allow, &self.ignore)?)
    }
}

#[derive(Args)]
struct StorageArgs {
    /// Artifact bucket (default: the per-account SageMaker bucket)
    #[arg(long, env = "DEPLOYKIT_BUCKET")]
    bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "DEPLOYKIT_PREFIX")]
    prefix: Option<String>,
}

#[derive(Args)]
struct ServingArgs {
    /// Serving backend
    #[arg(long, default_value = "huggingface")]
    backend: String,

    /// Backend version, or "latest"
    #[arg(long, default_value = "latest")]
    backend_version: String,

    /// Image URI overriding backend resolution
    #[arg(long)]
    image: Option<String>,

    /// Instance class
    #[arg(long, default_value = DEFAULT_INSTANCE_TYPE)]
    instance_type: String,

    /// Number of instances
    #[arg(long, default_value = "1")]
    instance_count: u32,

    /// Seconds the container may take to report healthy
    #[arg(long, default_value = "300")]
    health_check_timeout: u64,
}

impl ServingArgs {
    fn instance(&self) -> InstanceSpec {
        InstanceSpec {
            instance_type: self.instance_type.clone(),
            instance_count: self.instance_count,
        }
    }
}

#[derive(Args)]
struct LimitsArgs {
    /// GPUs per replica (tensor parallel degree)
    #[arg(long, default_value = "1")]
    gpus: u32,

    /// Maximum prompt length in tokens
    #[arg(long, default_value = "2048")]
    max_input_length: u32,

    /// Maximum prompt plus generated tokens
    #[arg(long, default_value = "4096")]
    max_total_tokens: u32,

    /// Quantization method (bitsandbytes, bitsandbytes-nf4, bitsandbytes-fp4, gptq, awq, eetq)
    #[arg(long)]
    quantize: Option<Quantization>,
}

impl LimitsArgs {
    fn config(&self, source: ModelSource) -> Result<DeploymentConfig> {
        Ok(DeploymentConfig::builder(source)
            .num_gpus(self.gpus)
            .max_input_length(self.max_input_length)
            .max_total_tokens(self.max_total_tokens)
            .quantize(self.quantize)
            .build()?)
    }
}

#[derive(Args)]
struct GenerationArgs {
    /// Maximum tokens to generate
    #[arg(long, default_value = "512")]
    max_new_tokens: u32,

    /// Sampling temperature
    #[arg(long, default_value = "0.8")]
    temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, default_value = "0.9")]
    top_p: f32,

    /// Top-k sampling
    #[arg(long)]
    top_k: Option<u32>,

    /// Repetition penalty
    #[arg(long, default_value = "1.03")]
    repetition_penalty: f32,

    /// Stop sequence (repeatable)
    #[arg(long = "stop", default_value = "</s>")]
    stop: Vec<String>,

    /// Greedy decoding (ignores the sampling options)
    #[arg(long)]
    greedy: bool,
}

impl GenerationArgs {
    fn parameters(&self) -> GenerationParameters {
        if self.greedy {
            let mut params = GenerationParameters::greedy(self.max_new_tokens);
            params.stop = self.stop.clone();
            return params;
        }
        GenerationParameters {
            do_sample: Some(true),
            top_p: Some(self.top_p),
            temperature: Some(self.temperature),
            top_k: self.top_k,
            max_new_tokens: Some(self.max_new_tokens),
            repetition_penalty: Some(self.repetition_penalty),
            stop: self.stop.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    deploykit_core::init_tracing(cli.json, level);

    let mut settings = Settings::from_env();
    if let Some(region) = &cli.region {
        settings = settings.with_region(region);
    }
    if let Some(profile) = &cli.profile {
        settings = settings.with_profile(profile);
    }

    match cli.command {
        Commands::Fetch { model, dest } => cmd_fetch(&settings, &model, &dest).await,
        Commands::Package {
            dir,
            output,
            weight_suffix,
            builtin,
        } => cmd_package(&dir, &output, &weight_suffix, builtin).await,
        Commands::Upload {
            archive,
            model,
            storage,
        } => cmd_upload(apply_storage(settings, &storage), &archive, &model).await,
        Commands::Image {
            backend,
            backend_version,
            list,
        } => cmd_image(&settings, &backend, &backend_version, list).await,
        Commands::Config { hub_model, limits } => cmd_config(hub_model, &limits),
        Commands::Deploy {
            model,
            model_data,
            serving,
            limits,
            role_arn,
        } => {
            let settings = match &role_arn {
                Some(arn) => settings.with_role_arn(arn),
                None => settings,
            };
            cmd_deploy(settings, &model, &model_data, &serving, &limits).await
        }
        Commands::Predict {
            endpoint,
            prompt,
            generation,
        } => cmd_predict(&settings, &endpoint, &prompt, &generation).await,
        Commands::Teardown {
            endpoint,
            model_name,
        } => cmd_teardown(&settings, &endpoint, model_name.as_deref()).await,
        Commands::Run {
            model,
            storage,
            serving,
            limits,
            generation,
            prompts,
            work_dir,
            builtin,
            teardown_on_error,
        } => {
            let run = RunArgs {
                model,
                serving,
                limits,
                generation,
                prompts,
                work_dir,
                builtin,
                teardown_on_error,
            };
            cmd_run(apply_storage(settings, &storage), run).await
        }
        Commands::Env => cmd_env(&settings),
    }
}

fn apply_storage(mut settings: Settings, storage: &StorageArgs) -> Settings {
    if let Some(bucket) = &storage.bucket {
        settings = settings.with_bucket(bucket);
    }
    if let Some(prefix) = &storage.prefix {
        settings = settings.with_key_prefix(prefix);
    }
    settings
}

fn archiver(builtin: bool) -> Archiver {
    if builtin {
        Archiver::new(ArchiveBackend::Builtin)
    } else {
        Archiver::detect()
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ========== Step Commands ==========

/// Download the filtered model files
async fn cmd_fetch(settings: &Settings, args: &ModelArgs, dest: &Path) -> Result<()> {
    let model = args.model_ref()?;
    let hub = HubClient::new(settings.hub.clone()).context("Failed to create hub client")?;

    let set = fetch_model(&hub, &model, &args.filter()?, &args.weight_suffix, dest)
        .await
        .with_context(|| format!("Failed to fetch {model}"))?;

    println!("Fetched {} files into {}", set.len(), dest.display());
    for file in &set.files {
        println!("  {}", file.display());
    }
    Ok(())
}

/// Verify weights and build the archive
async fn cmd_package(dir: &Path, output: &Path, weight_suffix: &str, builtin: bool) -> Result<()> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let model = ModelRef::new(&name, None).or_else(|_| ModelRef::new("model", None))?;
    verify_artifacts(&model, dir, weight_suffix)
        .with_context(|| format!("{} is not a complete model directory", dir.display()))?;

    let archive = archiver(builtin)
        .archive(dir, output)
        .await
        .context("Failed to build archive")?;

    println!("Archive: {}", archive.path.display());
    println!("Entries: {}", archive.entries.len());
    for entry in &archive.entries {
        println!("  {}", entry.display());
    }
    println!("Size: {} bytes", archive.size_bytes);
    println!("SHA-256: {} ({})", archive.short_digest(), archive.backend);
    Ok(())
}

/// Upload an archive to `s3://bucket[/prefix]/<model name>`
async fn cmd_upload(settings: Settings, archive: &Path, model: &str) -> Result<()> {
    let model = ModelRef::new(model, None)?;
    let cli = AwsCli::from_settings(&settings);
    let bucket = match &settings.bucket {
        Some(bucket) => bucket.clone(),
        None => {
            AwsSession::new(cli.clone(), settings.clone())
                .resolve()
                .await
                .context("Failed to resolve session")?
                .default_bucket
        }
    };

    let destination = artifact_destination(&bucket, settings.key_prefix.as_deref(), &model)?;
    let uri = upload_artifact(&S3Store::new(cli), archive, &destination)
        .await
        .context("Upload failed")?;
    println!("{uri}");
    Ok(())
}

/// Print the serving image for a backend and version
async fn cmd_image(settings: &Settings, backend: &str, version: &str, list: bool) -> Result<()> {
    if list {
        for v in TgiImageResolver::versions() {
            println!("{v}");
        }
        return Ok(());
    }

    let region = match &settings.region {
        Some(region) => region.clone(),
        None => {
            AwsSession::from_settings(settings.clone())
                .resolve()
                .await
                .context("Failed to resolve region")?
                .region
        }
    };
    let image = TgiImageResolver::new().resolve(backend, version, &region)?;
    println!("{image}");
    Ok(())
}

/// Print the container environment
fn cmd_config(hub_model: Option<String>, limits: &LimitsArgs) -> Result<()> {
    let source = match hub_model {
        Some(id) => ModelSource::Hub(id),
        None => ModelSource::Archive,
    };
    print_json(&limits.config(source)?)
}

/// Create an endpoint from an uploaded archive
async fn cmd_deploy(
    settings: Settings,
    model: &str,
    model_data: &str,
    serving: &ServingArgs,
    limits: &LimitsArgs,
) -> Result<()> {
    let model = ModelRef::new(model, None)?;
    let cli = AwsCli::from_settings(&settings);
    let session = AwsSession::new(cli.clone(), settings)
        .resolve()
        .await
        .context("Failed to resolve session")?;

    let image = match &serving.image {
        Some(image) => ImageUri(image.clone()),
        None => TgiImageResolver::new().resolve(
            &serving.backend,
            &serving.backend_version,
            &session.region,
        )?,
    };

    let request = plan_deployment(
        &session,
        &model,
        image,
        model_data,
        limits.config(ModelSource::Archive)?,
        &serving.instance(),
        Duration::from_secs(serving.health_check_timeout),
        Utc::now(),
    )?;

    let platform = SageMakerPlatform::new(cli);
    let handle = match deploy_endpoint(&platform, &request).await {
        Ok(handle) => handle,
        Err(e) => {
            if e.leaves_endpoint() {
                warn!(
                    endpoint = %request.endpoint_name,
                    model = %request.model_name,
                    "endpoint was created but is not serving; remove it with `deploykit teardown`"
                );
            }
            return Err(e).context("Deployment failed");
        }
    };
    print_json(&handle)
}

/// Send one prompt and print the generated text
async fn cmd_predict(
    settings: &Settings,
    endpoint: &str,
    prompt: &str,
    generation: &GenerationArgs,
) -> Result<()> {
    let platform = SageMakerPlatform::new(AwsCli::from_settings(settings));
    let handle = EndpointHandle::new(endpoint, endpoint);
    let text = generate(&platform, &handle, prompt, &generation.parameters())
        .await
        .context("Prediction failed")?;
    println!("{text}");
    Ok(())
}

/// Delete an endpoint and its model
async fn cmd_teardown(settings: &Settings, endpoint: &str, model_name: Option<&str>) -> Result<()> {
    let platform = SageMakerPlatform::new(AwsCli::from_settings(settings));
    let handle = EndpointHandle::new(endpoint, model_name.unwrap_or(endpoint));
    teardown(&platform, &handle)
        .await
        .into_result()
        .context("Teardown incomplete")?;
    println!("Deleted {handle}");
    Ok(())
}

// ========== End-to-end ==========

struct RunArgs {
    model: ModelArgs,
    serving: ServingArgs,
    limits: LimitsArgs,
    generation: GenerationArgs,
    prompts: Vec<String>,
    work_dir: Option<PathBuf>,
    builtin: bool,
    teardown_on_error: bool,
}

impl RunArgs {
    fn options(&self, work_dir: &Path, key_prefix: Option<String>) -> Result<WorkflowOptions> {
        let mut opts = WorkflowOptions::new(self.model.model_ref()?, work_dir);
        opts.filter = self.model.filter()?;
        opts.weight_suffix = self.model.weight_suffix.clone();
        opts.archiver = archiver(self.builtin);
        opts.key_prefix = key_prefix;
        opts.backend = self.serving.backend.clone();
        opts.backend_version = self.serving.backend_version.clone();
        opts.image_override = self.serving.image.clone().map(ImageUri);
        opts.instance = self.serving.instance();
        opts.num_gpus = self.limits.gpus;
        opts.max_input_length = self.limits.max_input_length;
        opts.max_total_tokens = self.limits.max_total_tokens;
        opts.quantize = self.limits.quantize;
        opts.health_check_timeout = Duration::from_secs(self.serving.health_check_timeout);
        Ok(opts)
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        if self.teardown_on_error {
            CleanupPolicy::Teardown
        } else {
            CleanupPolicy::LeaveRunning
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    model_data: &'a str,
    image: &'a str,
    endpoint: &'a EndpointHandle,
    completions: &'a [deploykit_core::Completion],
    teardown_complete: bool,
}

/// Fetch, package, upload, deploy, sample, tear down
async fn cmd_run(settings: Settings, run: RunArgs) -> Result<()> {
    if run.prompts.is_empty() {
        warn!("no --prompt given; the endpoint is deployed and deleted without requests");
    }

    // Removed when dropped at the end of the run
    let scratch;
    let work_dir = match &run.work_dir {
        Some(dir) => dir.clone(),
        None => {
            scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
            scratch.path().to_path_buf()
        }
    };
    let opts = run.options(&work_dir, settings.key_prefix.clone())?;

    let cli = AwsCli::from_settings(&settings);
    let hub = HubClient::new(settings.hub.clone()).context("Failed to create hub client")?;
    let session = AwsSession::new(cli.clone(), settings);
    let store = S3Store::new(cli.clone());
    let images = TgiImageResolver::new();
    let platform = SageMakerPlatform::new(cli);
    let workflow = Workflow::new(&session, &hub, &store, &images, &platform);
    info!(run_id = %workflow.run_id(), model = %opts.model, "starting run");

    let report = workflow
        .run(
            &opts,
            &run.prompts,
            &run.generation.parameters(),
            run.cleanup_policy(),
        )
        .await
        .with_context(|| format!("Run {} failed", workflow.run_id()))?;

    print_json(&RunSummary {
        run_id: &report.run_id,
        model_data: &report.model_data_uri,
        image: report.image.as_str(),
        endpoint: &report.endpoint,
        completions: &report.completions,
        teardown_complete: report.teardown.is_complete(),
    })?;
    report.teardown.into_result().context("Teardown incomplete")?;
    Ok(())
}

/// Show tool availability and settings
fn cmd_env(settings: &Settings) -> Result<()> {
    println!("deploykit {}", deploykit_core::VERSION);
    println!("==============");
    println!();

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("aws CLI installed: {}", yes_no(is_aws_cli_available()));
    println!("tar installed: {}", yes_no(is_tar_available()));
    println!("pigz installed: {}", yes_no(is_pigz_available()));
    println!("Archiver: {}", Archiver::detect().backend());
    println!();

    let show = |name: &str, value: Option<&str>| match value {
        Some(v) => println!("  {name}: {v}"),
        None => println!("  {name}: (not set)"),
    };
    println!("Settings:");
    show("region", settings.region.as_deref());
    show("profile", settings.profile.as_deref());
    show("role ARN", settings.role_arn.as_deref());
    show("role name", Some(settings.role_name.as_str()));
    show("bucket", settings.bucket.as_deref());
    show("key prefix", settings.key_prefix.as_deref());
    show("hub endpoint", Some(settings.hub.endpoint.as_str()));
    println!(
        "  hub token: {}",
        if settings.hub.token.is_some() { "(set)" } else { "(not set)" }
    );
    Ok(())
}

/// Entry paths of an archive.
#[cfg(test)]
fn archive_listing(path: &Path) -> Result<Vec<String>> {
    Ok(deploykit_artifacts::list_archive_entries(path)?
        .into_iter()
        .map(|p| p.display().to_string())
        .collect())
}
