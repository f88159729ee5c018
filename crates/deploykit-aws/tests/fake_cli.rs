//! Drives the backend against a shell script standing in for `aws`.
#![cfg(unix)]

use deploykit_aws::{AwsCli, AwsSession, S3Store, SageMakerPlatform};
use deploykit_core::{
    DeployError, DeployRequest, DeploymentConfig, EndpointHandle, ImageUri, InferencePlatform,
    ModelSource, ObjectStore, SessionProvider, Settings,
};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Writes an `aws` stand-in that logs its arguments and answers with
/// canned JSON. `status` is what `describe-endpoint` reports.
fn fake_aws(dir: &Path, status: &str) -> (PathBuf, PathBuf) {
    let log = dir.join("calls.log");
    let script = dir.join("aws");
    let body = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
case "$*" in
  *"sts get-caller-identity"*)
    echo '{{"UserId":"AIDA","Account":"111122223333","Arn":"arn:aws:sts::111122223333:assumed-role/SageMakerRole/nb"}}' ;;
  *"s3api head-bucket"*)
    echo "Not Found" >&2; exit 254 ;;
  *"describe-endpoint"*)
    echo '{{"EndpointStatus":"{status}","FailureReason":"ping health check failed"}}' ;;
  *"invoke-endpoint"*)
    for last; do :; done
    echo '[{{"generated_text":"Hello from the endpoint"}}]' > "$last"
    echo '{{"ContentType":"application/json"}}' ;;
  *"delete-model"*)
    echo "An error occurred (ValidationException) Could not find model" >&2; exit 254 ;;
  *) ;;
esac
"#,
        log = log.display(),
        status = status,
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

fn calls(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn cli(script: &Path) -> AwsCli {
    AwsCli::new()
        .with_program(script.to_str().unwrap())
        .with_region("us-east-1")
}

fn request() -> DeployRequest {
    DeployRequest {
        model_name: "model-2024-01-01-00-00-00-000".to_string(),
        endpoint_name: "model-2024-01-01-00-00-00-000".to_string(),
        role_arn: "arn:aws:iam::111122223333:role/SageMakerRole".to_string(),
        image: ImageUri("763104351884.dkr.ecr.us-east-1.amazonaws.com/tgi:2.0.2".to_string()),
        model_data_uri: "s3://bucket/model".to_string(),
        config: DeploymentConfig::builder(ModelSource::Archive).build().unwrap(),
        instance_type: "ml.g5.2xlarge".to_string(),
        instance_count: 1,
        num_gpus: 1,
        health_check_timeout: Duration::from_secs(300),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_converts_assumed_role_and_creates_bucket() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_aws(tmp.path(), "InService");
    let mut settings = Settings::from_env();
    settings.role_arn = None;
    settings.bucket = None;

    let session = AwsSession::new(cli(&script), settings).resolve().await.unwrap();

    assert_eq!(session.region, "us-east-1");
    assert_eq!(session.account, "111122223333");
    assert_eq!(session.role_arn, "arn:aws:iam::111122223333:role/SageMakerRole");
    assert_eq!(session.default_bucket, "sagemaker-us-east-1-111122223333");
    assert!(calls(&log)
        .iter()
        .any(|c| c.contains("s3 mb s3://sagemaker-us-east-1-111122223333")));
}

#[tokio::test]
async fn explicit_bucket_and_role_skip_lookups() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_aws(tmp.path(), "InService");
    let settings = Settings::from_env()
        .with_role_arn("arn:aws:iam::111122223333:role/Custom")
        .with_bucket("my-artifacts");

    let session = AwsSession::new(cli(&script), settings).resolve().await.unwrap();

    assert_eq!(session.role_arn, "arn:aws:iam::111122223333:role/Custom");
    assert_eq!(session.default_bucket, "my-artifacts");
    assert!(!calls(&log).iter().any(|c| c.contains("head-bucket")));
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_copies_to_exact_key() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_aws(tmp.path(), "InService");
    let archive = tmp.path().join("model.tar.gz");
    std::fs::write(&archive, b"archive").unwrap();

    let uri = S3Store::new(cli(&script))
        .upload(&archive, "s3://bucket/model")
        .await
        .unwrap();

    assert_eq!(uri, "s3://bucket/model");
    let log = calls(&log);
    assert!(log[0].contains("s3 cp"));
    assert!(log[0].contains("s3://bucket/model"));
}

// ---------------------------------------------------------------------------
// SageMaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_creates_resources_then_polls() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_aws(tmp.path(), "InService");
    let platform = SageMakerPlatform::new(cli(&script)).with_poll_interval(Duration::ZERO);

    let handle = platform.deploy(&request()).await.unwrap();

    assert_eq!(handle.endpoint_name, "model-2024-01-01-00-00-00-000");
    let ops: Vec<String> = calls(&log)
        .iter()
        .filter_map(|c| c.split_whitespace().find(|w| w.starts_with("create-") || *w == "describe-endpoint"))
        .map(str::to_string)
        .collect();
    assert_eq!(
        ops,
        vec![
            "create-model",
            "create-endpoint-config",
            "create-endpoint",
            "describe-endpoint"
        ]
    );
}

#[tokio::test]
async fn failed_endpoint_reports_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, _log) = fake_aws(tmp.path(), "Failed");
    let platform = SageMakerPlatform::new(cli(&script)).with_poll_interval(Duration::ZERO);

    match platform.deploy(&request()).await.unwrap_err() {
        DeployError::ProvisioningFailed { reason, .. } => {
            assert_eq!(reason, "ping health check failed")
        }
        other => panic!("expected ProvisioningFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn endpoint_stuck_creating_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, _log) = fake_aws(tmp.path(), "Creating");
    let mut req = request();
    req.health_check_timeout = Duration::ZERO;
    let platform = SageMakerPlatform::new(cli(&script))
        .with_poll_interval(Duration::from_millis(10))
        .with_provisioning_slack(Duration::from_millis(50));

    let err = platform.deploy(&req).await.unwrap_err();
    assert!(matches!(err, DeployError::ProvisioningTimedOut { .. }));
}

#[tokio::test]
async fn predict_reads_response_body() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, _log) = fake_aws(tmp.path(), "InService");
    let platform = SageMakerPlatform::new(cli(&script));
    let handle = EndpointHandle::new("ep", "m");

    let response = platform
        .predict(&handle, &json!({"inputs": "hi", "parameters": {}}))
        .await
        .unwrap();

    assert_eq!(response[0]["generated_text"], "Hello from the endpoint");
}

#[tokio::test]
async fn endpoint_deletion_runs_after_model_deletion_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_aws(tmp.path(), "InService");
    let platform = SageMakerPlatform::new(cli(&script));
    let handle = EndpointHandle::new("ep", "m");

    let report = deploykit_core::teardown(&platform, &handle).await;

    assert!(report.model_deleted.is_err());
    assert!(report.endpoint_deleted.is_ok());
    let log = calls(&log);
    assert!(log[0].contains("delete-model"));
    assert!(log[1].contains("delete-endpoint --endpoint-name ep"));
    assert!(log[2].contains("delete-endpoint-config"));
}
