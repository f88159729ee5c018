//! Session resolution: region, caller identity, execution role, bucket.

use async_trait::async_trait;
use deploykit_core::{DeployError, Result, Session, SessionProvider, Settings};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cli::AwsCli;

/// `sts get-caller-identity` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// Resolves the session through the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsSession {
    cli: AwsCli,
    settings: Settings,
}

impl AwsSession {
    pub fn new(cli: AwsCli, settings: Settings) -> Self {
        AwsSession { cli, settings }
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self::new(AwsCli::from_settings(&settings), settings)
    }

    async fn region(&self) -> Result<String> {
        if let Some(region) = self.cli.region().or(self.settings.region.as_deref()) {
            return Ok(region.to_string());
        }
        // `configure get` exits non-zero when the key is unset
        let configured = self
            .cli
            .run(["configure", "get", "region"])
            .await
            .unwrap_or_default();
        let configured = configured.trim();
        if configured.is_empty() {
            return Err(DeployError::InvalidConfig(
                "no region configured; set AWS_REGION or pass --region".to_string(),
            ));
        }
        Ok(configured.to_string())
    }

    async fn identity(&self) -> Result<CallerIdentity> {
        let value = self.cli.run_json(["sts", "get-caller-identity"]).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn execution_role(&self, identity: &CallerIdentity) -> Result<String> {
        if let Some(arn) = &self.settings.role_arn {
            return Ok(arn.clone());
        }
        if let Some(arn) = role_from_assumed_identity(&identity.arn) {
            debug!(%arn, "using the caller's SageMaker role");
            return Ok(arn);
        }

        let role_name = self.settings.role_name.as_str();
        let value = self
            .cli
            .run_json(["iam", "get-role", "--role-name", role_name])
            .await
            .map_err(|e| {
                DeployError::Authorization(format!(
                    "could not resolve execution role '{role_name}': {e}"
                ))
            })?;
        value["Role"]["Arn"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::Authorization(format!("role '{role_name}' has no ARN"))
            })
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self
            .cli
            .run(["s3api", "head-bucket", "--bucket", bucket])
            .await
            .is_ok()
        {
            return Ok(());
        }
        info!(%bucket, "creating artifact bucket");
        let uri = format!("s3://{bucket}");
        self.cli.run(["s3", "mb", uri.as_str()]).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for AwsSession {
    async fn resolve(&self) -> Result<Session> {
        let region = self.region().await?;
        let identity = self.identity().await?;
        let role_arn = self.execution_role(&identity).await?;

        let default_bucket = match &self.settings.bucket {
            Some(bucket) => bucket.clone(),
            None => {
                let bucket = default_bucket_name(&region, &identity.account);
                self.ensure_bucket(&bucket).await?;
                bucket
            }
        };

        Ok(Session {
            region,
            account: identity.account,
            role_arn,
            default_bucket,
        })
    }
}

/// Per-account bucket SageMaker uses by default.
pub fn default_bucket_name(region: &str, account: &str) -> String {
    format!("sagemaker-{region}-{account}")
}

/// IAM role ARN behind an assumed-role session of a SageMaker role.
///
/// `arn:aws:sts::123:assumed-role/AmazonSageMaker-ExecutionRole/SageMaker`
/// becomes `arn:aws:iam::123:role/AmazonSageMaker-ExecutionRole`. Other
/// callers return `None`.
pub fn role_from_assumed_identity(caller_arn: &str) -> Option<String> {
    let (prefix, resource) = caller_arn.split_once(":assumed-role/")?;
    let role = resource.split('/').next().filter(|r| !r.is_empty())?;
    if !role.to_ascii_lowercase().contains("sagemaker") {
        return None;
    }
    let prefix = prefix.replacen(":sts:", ":iam:", 1);
    Some(format!("{prefix}:role/{role}"))
}
