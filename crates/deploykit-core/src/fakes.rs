//! In-memory fakes for client traits (testing only)
//!
//! Provides `StaticSession`, `MemoryModelRegistry`, `MemoryObjectStore`
//! and `RecordingPlatform` that satisfy the trait contracts without any
//! network access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clients::*;
use crate::error::{DeployError, Result};
use crate::model::ModelRef;

// ---------------------------------------------------------------------------
// StaticSession
// ---------------------------------------------------------------------------

/// Session provider returning a fixed session, or an authorization error.
#[derive(Debug, Clone)]
pub struct StaticSession {
    session: Option<Session>,
}

impl StaticSession {
    pub fn new(bucket: &str) -> Self {
        StaticSession {
            session: Some(Session {
                region: "us-east-1".to_string(),
                account: "111122223333".to_string(),
                role_arn: "arn:aws:iam::111122223333:role/sagemaker_execution_role".to_string(),
                default_bucket: bucket.to_string(),
            }),
        }
    }

    /// A session whose resolution fails like a missing execution role.
    pub fn without_role() -> Self {
        StaticSession { session: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn resolve(&self) -> Result<Session> {
        self.session
            .clone()
            .ok_or_else(|| DeployError::Authorization("no execution role configured".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MemoryModelRegistry
// ---------------------------------------------------------------------------

/// Registry backed by `HashMap<model id, files>`; every revision sees the same files.
#[derive(Debug, Default)]
pub struct MemoryModelRegistry {
    models: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    downloads: Mutex<Vec<String>>,
}

impl MemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model with `(path, contents)` files.
    pub fn with_model(self, id: &str, files: &[(&str, &str)]) -> Self {
        let files = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
            .collect();
        self.models.lock().unwrap().insert(id.to_string(), files);
        self
    }

    /// Paths downloaded so far, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRegistry for MemoryModelRegistry {
    async fn list_files(&self, model: &ModelRef) -> Result<Vec<String>> {
        let models = self.models.lock().unwrap();
        models
            .get(model.id())
            .map(|files| files.iter().map(|(p, _)| p.clone()).collect())
            .ok_or_else(|| DeployError::Registry(format!("repository not found: {}", model.id())))
    }

    async fn download_file(
        &self,
        model: &ModelRef,
        path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let contents = {
            let models = self.models.lock().unwrap();
            models
                .get(model.id())
                .and_then(|files| files.iter().find(|(p, _)| p == path))
                .map(|(_, c)| c.clone())
                .ok_or_else(|| {
                    DeployError::Registry(format!("{} not found in {}", path, model.id()))
                })?
        };

        let target = dest_dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, contents)?;
        self.downloads.lock().unwrap().push(path.to_string());
        Ok(target)
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// Object store backed by `HashMap<uri, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(uri).cloned()
    }

    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        uris.sort();
        uris
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, local: &Path, destination: &str) -> Result<String> {
        let bytes = std::fs::read(local)?;
        let uri = if destination.ends_with('/') {
            let name = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{destination}{name}")
        } else {
            destination.to_string()
        };
        self.objects.lock().unwrap().insert(uri.clone(), bytes);
        Ok(uri)
    }
}

// ---------------------------------------------------------------------------
// RecordingPlatform
// ---------------------------------------------------------------------------

/// A platform call, as recorded by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Deploy { endpoint_name: String, model_data_uri: String },
    Predict { endpoint_name: String, payload: Value },
    DeleteModel { model_name: String },
    DeleteEndpoint { endpoint_name: String },
}

/// Platform fake that records every call and can be told to fail.
#[derive(Debug)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    requests: Mutex<Vec<DeployRequest>>,
    reply: String,
    fail_deploy: Option<String>,
    stall_deploy: bool,
    fail_predict: bool,
    fail_delete_model: bool,
    fail_delete_endpoint: bool,
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        RecordingPlatform {
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            reply: "generated".to_string(),
            fail_deploy: None,
            stall_deploy: false,
            fail_predict: false,
            fail_delete_model: false,
            fail_delete_endpoint: false,
        }
    }
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text returned as the single candidate of every prediction.
    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// Make `deploy` fail as if the health check never passed.
    pub fn failing_deploy(mut self, reason: &str) -> Self {
        self.fail_deploy = Some(reason.to_string());
        self
    }

    /// Make `deploy` give up while the endpoint is still creating.
    pub fn stalling_deploy(mut self) -> Self {
        self.stall_deploy = true;
        self
    }

    pub fn failing_predict(mut self) -> Self {
        self.fail_predict = true;
        self
    }

    pub fn failing_delete_model(mut self) -> Self {
        self.fail_delete_model = true;
        self
    }

    pub fn failing_delete_endpoint(mut self) -> Self {
        self.fail_delete_endpoint = true;
        self
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deploy_requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InferencePlatform for RecordingPlatform {
    async fn deploy(&self, request: &DeployRequest) -> Result<EndpointHandle> {
        self.record(PlatformCall::Deploy {
            endpoint_name: request.endpoint_name.clone(),
            model_data_uri: request.model_data_uri.clone(),
        });
        self.requests.lock().unwrap().push(request.clone());

        if let Some(reason) = &self.fail_deploy {
            return Err(DeployError::ProvisioningFailed {
                endpoint: request.endpoint_name.clone(),
                reason: reason.clone(),
            });
        }
        if self.stall_deploy {
            return Err(DeployError::ProvisioningTimedOut {
                endpoint: request.endpoint_name.clone(),
                waited_secs: request.health_check_timeout.as_secs(),
            });
        }
        Ok(EndpointHandle::new(
            request.endpoint_name.clone(),
            request.model_name.clone(),
        ))
    }

    async fn predict(&self, endpoint: &EndpointHandle, payload: &Value) -> Result<Value> {
        self.record(PlatformCall::Predict {
            endpoint_name: endpoint.endpoint_name.clone(),
            payload: payload.clone(),
        });
        if self.fail_predict {
            return Err(DeployError::CommandFailed {
                tool: "invoke-endpoint".to_string(),
                stderr: "ModelError: received server error (500)".to_string(),
            });
        }
        Ok(json!([{ "generated_text": self.reply }]))
    }

    async fn delete_model(&self, endpoint: &EndpointHandle) -> Result<()> {
        self.record(PlatformCall::DeleteModel {
            model_name: endpoint.model_name.clone(),
        });
        if self.fail_delete_model {
            return Err(DeployError::CommandFailed {
                tool: "delete-model".to_string(),
                stderr: "ThrottlingException".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint: &EndpointHandle) -> Result<()> {
        self.record(PlatformCall::DeleteEndpoint {
            endpoint_name: endpoint.endpoint_name.clone(),
        });
        if self.fail_delete_endpoint {
            return Err(DeployError::CommandFailed {
                tool: "delete-endpoint".to_string(),
                stderr: "ValidationException".to_string(),
            });
        }
        Ok(())
    }
}
