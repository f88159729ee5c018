use deploykit_core::fakes::{PlatformCall, RecordingPlatform};
use deploykit_core::{teardown, DeployError, EndpointHandle};

fn handle() -> EndpointHandle {
    EndpointHandle::new("llama-ep", "llama-model")
}

#[tokio::test]
async fn teardown_deletes_model_then_endpoint() {
    let platform = RecordingPlatform::new();
    let report = teardown(&platform, &handle()).await;

    assert!(report.is_complete());
    assert_eq!(
        platform.calls(),
        vec![
            PlatformCall::DeleteModel {
                model_name: "llama-model".to_string()
            },
            PlatformCall::DeleteEndpoint {
                endpoint_name: "llama-ep".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn endpoint_deletion_still_attempted_when_model_deletion_fails() {
    let platform = RecordingPlatform::new().failing_delete_model();
    let report = teardown(&platform, &handle()).await;

    assert!(report.model_deleted.is_err());
    assert!(report.endpoint_deleted.is_ok());
    assert_eq!(platform.calls().len(), 2);
    assert!(matches!(
        platform.calls()[1],
        PlatformCall::DeleteEndpoint { .. }
    ));

    match report.into_result() {
        Err(DeployError::Teardown(msg)) => {
            assert!(msg.contains("llama-model"));
            assert!(!msg.contains("endpoint llama-ep"));
        }
        other => panic!("expected Teardown error, got {other:?}"),
    }
}

#[tokio::test]
async fn both_failures_are_reported() {
    let platform = RecordingPlatform::new()
        .failing_delete_model()
        .failing_delete_endpoint();
    let report = teardown(&platform, &handle()).await;

    assert!(!report.is_complete());
    let err = report.into_result().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("model llama-model"));
    assert!(msg.contains("endpoint llama-ep"));
}
