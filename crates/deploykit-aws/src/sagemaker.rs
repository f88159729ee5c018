//! SageMaker endpoints through `aws sagemaker` and `aws sagemaker-runtime`.
//!
//! Deployment registers the model, creates an endpoint configuration and
//! an endpoint sharing one name, then polls `describe-endpoint` until the
//! endpoint is `InService`, `Failed`, or the deadline passes.

use async_trait::async_trait;
use deploykit_core::{
    DeployError, DeployRequest, EndpointHandle, InferencePlatform, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cli::AwsCli;

/// Time between `describe-endpoint` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Provisioning time allowed on top of the container health check.
pub const DEFAULT_PROVISIONING_SLACK: Duration = Duration::from_secs(30 * 60);

const VARIANT_NAME: &str = "AllTraffic";

/// Endpoint lifecycle states reported by `describe-endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    OutOfService,
    Creating,
    Updating,
    SystemUpdating,
    RollingBack,
    InService,
    Deleting,
    Failed,
    Other(String),
}

impl EndpointStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "OutOfService" => EndpointStatus::OutOfService,
            "Creating" => EndpointStatus::Creating,
            "Updating" => EndpointStatus::Updating,
            "SystemUpdating" => EndpointStatus::SystemUpdating,
            "RollingBack" => EndpointStatus::RollingBack,
            "InService" => EndpointStatus::InService,
            "Deleting" => EndpointStatus::Deleting,
            "Failed" => EndpointStatus::Failed,
            other => EndpointStatus::Other(other.to_string()),
        }
    }

    /// States that will not reach `InService` without intervention.
    pub fn is_dead_end(&self) -> bool {
        matches!(
            self,
            EndpointStatus::Failed | EndpointStatus::Deleting | EndpointStatus::OutOfService
        )
    }
}

/// The parts of `describe-endpoint` output the poller reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    pub status: EndpointStatus,
    pub failure_reason: Option<String>,
}

impl EndpointDescription {
    pub fn from_json(value: &Value) -> Result<Self> {
        let status = value["EndpointStatus"].as_str().ok_or_else(|| {
            DeployError::InvalidResponse("describe-endpoint output has no EndpointStatus".into())
        })?;
        Ok(EndpointDescription {
            status: EndpointStatus::parse(status),
            failure_reason: value["FailureReason"].as_str().map(str::to_string),
        })
    }
}

/// `--primary-container` document.
pub fn primary_container(request: &DeployRequest) -> Value {
    json!({
        "Image": request.image.as_str(),
        "ModelDataUrl": request.model_data_uri,
        "Environment": request.config.as_map(),
    })
}

/// `--production-variants` document.
pub fn production_variants(request: &DeployRequest) -> Value {
    json!([{
        "VariantName": VARIANT_NAME,
        "ModelName": request.model_name,
        "InitialInstanceCount": request.instance_count,
        "InstanceType": request.instance_type,
        "ContainerStartupHealthCheckTimeoutInSeconds": request.health_check_timeout.as_secs(),
    }])
}

pub fn create_model_args(request: &DeployRequest) -> Vec<String> {
    vec![
        "sagemaker".into(),
        "create-model".into(),
        "--model-name".into(),
        request.model_name.clone(),
        "--execution-role-arn".into(),
        request.role_arn.clone(),
        "--primary-container".into(),
        primary_container(request).to_string(),
    ]
}

pub fn create_endpoint_config_args(request: &DeployRequest) -> Vec<String> {
    vec![
        "sagemaker".into(),
        "create-endpoint-config".into(),
        "--endpoint-config-name".into(),
        request.endpoint_name.clone(),
        "--production-variants".into(),
        production_variants(request).to_string(),
    ]
}

pub fn create_endpoint_args(request: &DeployRequest) -> Vec<String> {
    vec![
        "sagemaker".into(),
        "create-endpoint".into(),
        "--endpoint-name".into(),
        request.endpoint_name.clone(),
        "--endpoint-config-name".into(),
        request.endpoint_name.clone(),
    ]
}

/// SageMaker inference platform.
#[derive(Debug, Clone)]
pub struct SageMakerPlatform {
    cli: AwsCli,
    poll_interval: Duration,
    provisioning_slack: Duration,
}

impl SageMakerPlatform {
    pub fn new(cli: AwsCli) -> Self {
        SageMakerPlatform {
            cli,
            poll_interval: DEFAULT_POLL_INTERVAL,
            provisioning_slack: DEFAULT_PROVISIONING_SLACK,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_provisioning_slack(mut self, slack: Duration) -> Self {
        self.provisioning_slack = slack;
        self
    }

    pub async fn describe_endpoint(&self, endpoint_name: &str) -> Result<EndpointDescription> {
        let value = self
            .cli
            .run_json(["sagemaker", "describe-endpoint", "--endpoint-name", endpoint_name])
            .await?;
        EndpointDescription::from_json(&value)
    }

    async fn wait_in_service(&self, endpoint_name: &str, deadline: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            let description = self.describe_endpoint(endpoint_name).await?;
            debug!(endpoint = %endpoint_name, status = ?description.status, "endpoint status");

            if description.status == EndpointStatus::InService {
                return Ok(());
            }
            if description.status.is_dead_end() {
                return Err(DeployError::ProvisioningFailed {
                    endpoint: endpoint_name.to_string(),
                    reason: description
                        .failure_reason
                        .unwrap_or_else(|| format!("endpoint is {:?}", description.status)),
                });
            }
            if started.elapsed() >= deadline {
                return Err(DeployError::ProvisioningTimedOut {
                    endpoint: endpoint_name.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl InferencePlatform for SageMakerPlatform {
    async fn deploy(&self, request: &DeployRequest) -> Result<EndpointHandle> {
        self.cli.run(create_model_args(request)).await?;
        info!(model = %request.model_name, "model registered");

        self.cli.run(create_endpoint_config_args(request)).await?;
        self.cli.run(create_endpoint_args(request)).await?;
        info!(
            endpoint = %request.endpoint_name,
            instance_type = %request.instance_type,
            num_gpus = request.num_gpus,
            "endpoint creation started"
        );

        let deadline = request.health_check_timeout + self.provisioning_slack;
        self.wait_in_service(&request.endpoint_name, deadline).await?;

        Ok(EndpointHandle::new(
            request.endpoint_name.clone(),
            request.model_name.clone(),
        ))
    }

    async fn predict(&self, endpoint: &EndpointHandle, payload: &Value) -> Result<Value> {
        let scratch = tempfile::tempdir()?;
        let body = scratch.path().join("body.json");
        let response = scratch.path().join("response.json");
        tokio::fs::write(&body, serde_json::to_vec(payload)?).await?;

        let body_arg = format!("fileb://{}", body.display());
        self.cli
            .run([
                OsStr::new("sagemaker-runtime"),
                OsStr::new("invoke-endpoint"),
                OsStr::new("--endpoint-name"),
                OsStr::new(&endpoint.endpoint_name),
                OsStr::new("--content-type"),
                OsStr::new("application/json"),
                OsStr::new("--accept"),
                OsStr::new("application/json"),
                OsStr::new("--body"),
                OsStr::new(&body_arg),
                response.as_os_str(),
            ])
            .await?;

        let bytes = tokio::fs::read(&response).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DeployError::InvalidResponse(format!("response is not JSON: {e}")))
    }

    async fn delete_model(&self, endpoint: &EndpointHandle) -> Result<()> {
        self.cli
            .run([
                "sagemaker",
                "delete-model",
                "--model-name",
                endpoint.model_name.as_str(),
            ])
            .await?;
        Ok(())
    }

    /// Deletes the endpoint and then its configuration; both are attempted.
    async fn delete_endpoint(&self, endpoint: &EndpointHandle) -> Result<()> {
        let name = endpoint.endpoint_name.as_str();
        let endpoint_result = self
            .cli
            .run(["sagemaker", "delete-endpoint", "--endpoint-name", name])
            .await;
        let config_result = self
            .cli
            .run([
                "sagemaker",
                "delete-endpoint-config",
                "--endpoint-config-name",
                name,
            ])
            .await;

        if let Err(e) = &config_result {
            warn!(endpoint = %name, error = %e, "endpoint configuration deletion failed");
        }
        endpoint_result?;
        config_result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploykit_core::{DeploymentConfig, ImageUri, ModelSource};

    fn request() -> DeployRequest {
        DeployRequest {
            model_name: "llama-2024-01-01".to_string(),
            endpoint_name: "llama-2024-01-01".to_string(),
            role_arn: "arn:aws:iam::111122223333:role/sagemaker_execution_role".to_string(),
            image: ImageUri("763104351884.dkr.ecr.us-east-1.amazonaws.com/tgi:latest".to_string()),
            model_data_uri: "s3://bucket/llama".to_string(),
            config: DeploymentConfig::builder(ModelSource::Archive)
                .num_gpus(4)
                .build()
                .unwrap(),
            instance_type: "ml.g5.12xlarge".to_string(),
            instance_count: 1,
            num_gpus: 4,
            health_check_timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_primary_container_document() {
        let doc = primary_container(&request());
        assert_eq!(doc["ModelDataUrl"], "s3://bucket/llama");
        assert_eq!(doc["Environment"]["SM_NUM_GPUS"], "4");
        assert_eq!(doc["Environment"]["HF_MODEL_ID"], "/opt/ml/model");
        assert!(doc["Image"].as_str().unwrap().ends_with("tgi:latest"));
    }

    #[test]
    fn test_production_variant_carries_health_check_timeout() {
        let doc = production_variants(&request());
        let variant = &doc[0];
        assert_eq!(variant["VariantName"], "AllTraffic");
        assert_eq!(variant["InstanceType"], "ml.g5.12xlarge");
        assert_eq!(variant["InitialInstanceCount"], 1);
        assert_eq!(variant["ContainerStartupHealthCheckTimeoutInSeconds"], 300);
    }

    #[test]
    fn test_endpoint_shares_config_name() {
        let args = create_endpoint_args(&request());
        assert_eq!(args[3], args[5]);
        let args = create_endpoint_config_args(&request());
        assert_eq!(args[3], "llama-2024-01-01");
    }

    #[test]
    fn test_create_model_args() {
        let args = create_model_args(&request());
        assert_eq!(&args[..2], ["sagemaker", "create-model"]);
        let container: Value = serde_json::from_str(&args[7]).unwrap();
        assert_eq!(container["ModelDataUrl"], "s3://bucket/llama");
    }

    #[test]
    fn test_describe_parses_failure() {
        let desc = EndpointDescription::from_json(&json!({
            "EndpointName": "e",
            "EndpointStatus": "Failed",
            "FailureReason": "The primary container did not pass the ping health check."
        }))
        .unwrap();
        assert_eq!(desc.status, EndpointStatus::Failed);
        assert!(desc.status.is_dead_end());
        assert!(desc.failure_reason.unwrap().contains("health check"));
    }

    #[test]
    fn test_describe_without_status_is_invalid() {
        let err = EndpointDescription::from_json(&json!({})).unwrap_err();
        assert!(matches!(err, DeployError::InvalidResponse(_)));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(EndpointStatus::parse("Creating"), EndpointStatus::Creating);
        assert!(!EndpointStatus::Creating.is_dead_end());
        assert_eq!(
            EndpointStatus::parse("Mystery"),
            EndpointStatus::Other("Mystery".to_string())
        );
    }
}
