//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use datapred_worker::cache::MemoryStore;
use datapred_worker::config::AzureMlSettings;
use datapred_worker::conventions::TrainingConventions;
use datapred_worker::error::{PipelineError, StorageError};
use datapred_worker::pipeline::{
    EndpointHandle, PipelineRuntime, PipelineSubmission, RunHandle, RunStatus,
    ServicePrincipalCredentials, WorkspaceHandle, WorkspaceLocator,
};
use datapred_worker::scheduler::{QueueError, QueuedRequest, RequestSource};
use datapred_worker::storage::ExistenceChecker;
use datapred_worker::worker::{RequestOutcome, Worker};

pub const ENVIRONMENT: &str = "rnd";
pub const PIPELINE_COUNTRY: &str = "any";
pub const PIPELINE_SUFFIX: &str = "pipeline";

pub fn azureml_settings() -> AzureMlSettings {
    AzureMlSettings {
        tenant_id: "tenant-id".to_string(),
        service_principal_id: "sp-id".to_string(),
        service_principal_secret: "sp-secret".to_string(),
        subscription_id: "subscription-id".to_string(),
        resource_group: "resource-group".to_string(),
        workspace_name: "workspace".to_string(),
        ..AzureMlSettings::default()
    }
}

/// The request used by the validation and call tests.
pub fn request_json() -> Value {
    json!({
        "requestId": "12345",
        "application": "APP",
        "consumer": "CONSUMER",
        "country": "US",
        "client": "CLIENT",
        "characteristics": ["char"],
        "input": {
            "assets": [
                {
                    "name": "test.csv",
                    "path": "dummy/path/to/test.csv",
                    "delimiter": "comma"
                }
            ]
        }
    })
}

/// Storage that reports every file as present or every file as missing.
pub struct FakeStorage {
    found: bool,
    pub checked: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn new(found: bool) -> Self {
        Self {
            found,
            checked: Mutex::new(Vec::new()),
        }
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExistenceChecker for FakeStorage {
    async fn check_file(&self, path: &str) -> Result<(), StorageError> {
        self.checked.lock().unwrap().push(path.to_string());
        if self.found {
            Ok(())
        } else {
            Err(StorageError::NotFound(path.to_string()))
        }
    }
}

/// Everything the worker asked of the runtime.
#[derive(Debug, Default)]
pub struct RuntimeCalls {
    pub connects: Vec<(ServicePrincipalCredentials, WorkspaceLocator)>,
    pub endpoint_lookups: Vec<String>,
    pub submissions: Vec<(String, PipelineSubmission)>,
    pub tags: Vec<BTreeMap<String, String>>,
    pub waits: usize,
}

/// Runtime that records calls and finishes every run with a fixed status.
pub struct RecordingRuntime {
    final_status: RunStatus,
    auth_error: Option<String>,
    pub calls: Mutex<RuntimeCalls>,
}

impl RecordingRuntime {
    pub fn new(final_status: RunStatus) -> Self {
        Self {
            final_status,
            auth_error: None,
            calls: Mutex::new(RuntimeCalls::default()),
        }
    }

    pub fn failing_auth(message: &str) -> Self {
        Self {
            auth_error: Some(message.to_string()),
            ..Self::new(RunStatus::Completed)
        }
    }
}

#[async_trait]
impl PipelineRuntime for RecordingRuntime {
    async fn connect(
        &self,
        credentials: &ServicePrincipalCredentials,
        locator: &WorkspaceLocator,
    ) -> Result<WorkspaceHandle, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .connects
            .push((credentials.clone(), locator.clone()));

        if let Some(message) = &self.auth_error {
            return Err(PipelineError::Authentication(message.clone()));
        }

        Ok(WorkspaceHandle {
            locator: locator.clone(),
            api_base: "https://fake.api.azureml.ms".to_string(),
            access_token: "token".to_string(),
            token_expires_at: None,
            credentials: credentials.clone(),
        })
    }

    async fn get_endpoint(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<EndpointHandle, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .endpoint_lookups
            .push(name.to_string());

        Ok(EndpointHandle {
            id: format!("{}-id", name),
            name: name.to_string(),
            workspace: workspace.clone(),
        })
    }

    async fn submit(
        &self,
        endpoint: &EndpointHandle,
        submission: &PipelineSubmission,
    ) -> Result<RunHandle, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .submissions
            .push((endpoint.id.clone(), submission.clone()));

        Ok(RunHandle {
            run_id: "run-0001".to_string(),
            experiment_name: submission.experiment_name.clone(),
            workspace: endpoint.workspace.clone(),
        })
    }

    async fn set_tags(
        &self,
        _run: &RunHandle,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        self.calls.lock().unwrap().tags.push(tags.clone());
        Ok(())
    }

    async fn wait_for_completion(
        &self,
        _run: &RunHandle,
        _show_output: bool,
    ) -> Result<RunStatus, PipelineError> {
        self.calls.lock().unwrap().waits += 1;
        Ok(self.final_status)
    }
}

pub fn training_conventions() -> TrainingConventions {
    TrainingConventions::new(ENVIRONMENT, PIPELINE_COUNTRY, PIPELINE_SUFFIX)
}

pub fn build_worker(
    storage: Arc<FakeStorage>,
    cache: Arc<MemoryStore>,
    runtime: Arc<RecordingRuntime>,
) -> Worker<TrainingConventions> {
    Worker::new(
        training_conventions(),
        storage,
        cache,
        runtime,
        &azureml_settings(),
    )
}

/// Request source backed by in-memory lists.
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueuedRequest>>,
    pub completed: Mutex<Vec<(QueuedRequest, RequestOutcome)>>,
}

impl InMemoryQueue {
    pub fn with_payloads(payloads: Vec<Value>) -> Self {
        Self {
            pending: Mutex::new(payloads.into_iter().map(QueuedRequest::new).collect()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn completed(&self) -> Vec<(QueuedRequest, RequestOutcome)> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestSource for InMemoryQueue {
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedRequest>, QueueError> {
        let next = self.pending.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    async fn complete(
        &self,
        request: &QueuedRequest,
        outcome: &RequestOutcome,
    ) -> Result<(), QueueError> {
        self.completed
            .lock()
            .unwrap()
            .push((request.clone(), outcome.clone()));
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.pending.lock().unwrap().len())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
