//! Endpoint provisioning.
//!
//! Builds the [`DeployRequest`] for a packaged model and hands it to the
//! platform, which blocks until the endpoint is in service or fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

use crate::clients::{DeployRequest, EndpointHandle, ImageUri, InferencePlatform, Session};
use crate::deploy_config::DeploymentConfig;
use crate::error::{DeployError, Result};
use crate::model::ModelRef;
use crate::obs::stage_span;

/// Time the container gets to report healthy after startup.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(300);

/// Instance class used when none is given.
pub const DEFAULT_INSTANCE_TYPE: &str = "ml.g5.2xlarge";

/// Platform limit on model and endpoint names.
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

/// Compute resources behind the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_type: String,
    pub instance_count: u32,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        InstanceSpec {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            instance_count: 1,
        }
    }
}

/// Unique resource name: sanitized `base` plus a millisecond timestamp.
///
/// Only ASCII alphanumerics and `-` survive; the base is cut so the
/// result fits [`MAX_RESOURCE_NAME_LEN`].
pub fn resource_name(base: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%d-%H-%M-%S-%3f").to_string();

    let mut sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    sanitized = sanitized.trim_matches('-').to_string();
    if sanitized.is_empty() {
        sanitized = "model".to_string();
    }

    let budget = MAX_RESOURCE_NAME_LEN - stamp.len() - 1;
    sanitized.truncate(budget);
    let sanitized = sanitized.trim_end_matches('-');

    format!("{sanitized}-{stamp}")
}

/// Assemble the request for deploying `model` from an uploaded archive.
#[allow(clippy::too_many_arguments)]
pub fn plan_deployment(
    session: &Session,
    model: &ModelRef,
    image: ImageUri,
    model_data_uri: &str,
    config: DeploymentConfig,
    instance: &InstanceSpec,
    health_check_timeout: Duration,
    at: DateTime<Utc>,
) -> Result<DeployRequest> {
    if instance.instance_count == 0 {
        return Err(DeployError::InvalidConfig(
            "instance count must be at least 1".to_string(),
        ));
    }
    if instance.instance_type.trim().is_empty() {
        return Err(DeployError::InvalidConfig("instance type is empty".to_string()));
    }

    let num_gpus = config.num_gpus().ok_or_else(|| {
        DeployError::InvalidConfig("configuration has no GPU count".to_string())
    })?;

    let name = resource_name(model.short_name(), at);
    Ok(DeployRequest {
        model_name: name.clone(),
        endpoint_name: name,
        role_arn: session.role_arn.clone(),
        image,
        model_data_uri: model_data_uri.to_string(),
        config,
        instance_type: instance.instance_type.clone(),
        instance_count: instance.instance_count,
        num_gpus,
        health_check_timeout,
    })
}

/// Provision the endpoint described by `request`.
pub async fn deploy_endpoint(
    platform: &dyn InferencePlatform,
    request: &DeployRequest,
) -> Result<EndpointHandle> {
    async {
        let started = Instant::now();
        info!(
            endpoint = %request.endpoint_name,
            image = %request.image,
            instance_type = %request.instance_type,
            instance_count = request.instance_count,
            num_gpus = request.num_gpus,
            health_check_timeout_secs = request.health_check_timeout.as_secs(),
            "deploying endpoint"
        );

        match platform.deploy(request).await {
            Ok(handle) => {
                info!(
                    endpoint = %handle.endpoint_name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "endpoint in service"
                );
                Ok(handle)
            }
            Err(e) => {
                warn!(endpoint = %request.endpoint_name, error = %e, "deployment failed");
                Err(e)
            }
        }
    }
    .instrument(stage_span("deploy"))
    .await
}
