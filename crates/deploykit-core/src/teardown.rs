//! Endpoint teardown.
//!
//! Both deletions are always attempted, in order: model registration
//! first, then the endpoint. A failure in one never skips the other.

use tracing::{info, warn};

use crate::clients::{EndpointHandle, InferencePlatform};
use crate::error::{DeployError, Result};

/// Outcome of each deletion.
#[derive(Debug)]
pub struct TeardownReport {
    pub endpoint: EndpointHandle,
    pub model_deleted: Result<()>,
    pub endpoint_deleted: Result<()>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.model_deleted.is_ok() && self.endpoint_deleted.is_ok()
    }

    /// Collapse into a single result, naming every failed deletion.
    pub fn into_result(self) -> Result<()> {
        let mut failures = Vec::new();
        if let Err(e) = &self.model_deleted {
            failures.push(format!("model {}: {}", self.endpoint.model_name, e));
        }
        if let Err(e) = &self.endpoint_deleted {
            failures.push(format!("endpoint {}: {}", self.endpoint.endpoint_name, e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Teardown(failures.join("; ")))
        }
    }
}

/// Delete the model registration and the endpoint.
pub async fn teardown(platform: &dyn InferencePlatform, endpoint: &EndpointHandle) -> TeardownReport {
    let model_deleted = platform.delete_model(endpoint).await;
    match &model_deleted {
        Ok(()) => info!(model = %endpoint.model_name, "model deleted"),
        Err(e) => warn!(model = %endpoint.model_name, error = %e, "model deletion failed"),
    }

    let endpoint_deleted = platform.delete_endpoint(endpoint).await;
    match &endpoint_deleted {
        Ok(()) => info!(endpoint = %endpoint.endpoint_name, "endpoint deleted"),
        Err(e) => warn!(endpoint = %endpoint.endpoint_name, error = %e, "endpoint deletion failed"),
    }

    TeardownReport {
        endpoint: endpoint.clone(),
        model_deleted,
        endpoint_deleted,
    }
}
