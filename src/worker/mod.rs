//! The request adapter.
//!
//! [`Worker`] turns one inbound request into one pipeline run:
//!
//! 1. **validate_request**: required keys, asset paths, input files in storage
//! 2. **call_pipeline**: authenticate, resolve the endpoint, submit, tag, wait
//! 3. **ml_exec_request**: cached-request check, then `call_pipeline`, mapped
//!    to a `(status, PipelineMessage)` pair
//! 4. **handle**: the full lifecycle with metrics, producing a [`RequestOutcome`]
//!
//! The worker flavor (naming, display name, parameters) is supplied through
//! a [`PipelineConventionsBuilder`]; every collaborator is a trait object so
//! tests can substitute fakes.

mod outcome;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::{self, escape_glob, KeyValueStore, RedisStore};
use crate::config::{AzureMlSettings, WorkerConfig};
use crate::conventions::{PipelineConventionsBuilder, TrainingConventions};
use crate::error::{PipelineError, WorkerError};
use crate::metrics::MetricsCollector;
use crate::pipeline::{
    AzureMlRuntime, PipelineMessage, PipelineRuntime, PipelineSubmission, RunStatus,
    ServicePrincipalCredentials, WorkspaceLocator,
};
use crate::request::{usable_asset_path, AssetIssue, Request, RequestContext, METADATA_SUFFIXES};
use crate::storage::{self, ExistenceChecker};

pub use outcome::{RequestOutcome, RequestState};

/// Prefix of every rejection caused by input files.
pub const INPUT_FILES_NOT_FOUND: &str = "Input files not found";

/// A pipeline run that reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedRun {
    pub run_id: String,
    pub pipeline_name: String,
    pub experiment_name: String,
    pub status: RunStatus,
    /// Time from submission to terminal status.
    pub duration: Duration,
}

/// Request adapter for one worker flavor.
pub struct Worker<B: PipelineConventionsBuilder> {
    conventions: B,
    storage: Arc<dyn ExistenceChecker>,
    metadata: Option<Arc<dyn KeyValueStore>>,
    cache: Arc<dyn KeyValueStore>,
    runtime: Arc<dyn PipelineRuntime>,
    credentials: ServicePrincipalCredentials,
    locator: WorkspaceLocator,
    show_output: bool,
    metrics: MetricsCollector,
}

impl<B: PipelineConventionsBuilder> Worker<B> {
    /// Creates a worker.
    ///
    /// # Arguments
    ///
    /// * `conventions` - Builder for pipeline names, parameters and tags
    /// * `storage` - Existence checks for input files
    /// * `cache` - Store holding the cached requests
    /// * `runtime` - The pipeline runtime client
    /// * `azureml` - Credentials and workspace coordinates
    pub fn new(
        conventions: B,
        storage: Arc<dyn ExistenceChecker>,
        cache: Arc<dyn KeyValueStore>,
        runtime: Arc<dyn PipelineRuntime>,
        azureml: &AzureMlSettings,
    ) -> Self {
        Self {
            conventions,
            storage,
            metadata: None,
            cache,
            runtime,
            credentials: ServicePrincipalCredentials::from_settings(azureml),
            locator: WorkspaceLocator::from_settings(azureml),
            show_output: azureml.show_output,
            metrics: MetricsCollector::new(),
        }
    }

    /// Adds the metadata store consulted during validation.
    pub fn with_metadata_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    pub fn conventions(&self) -> &B {
        &self.conventions
    }

    /// Checks a request before it is executed.
    ///
    /// Never fails: every problem is reported as `(false, diagnostic)`.
    /// Asset problems, whether a malformed path or a failed storage check,
    /// are collected into one message prefixed with `"Input files not found"`.
    pub async fn validate_request(
        &self,
        payload: &Value,
        context: Option<&RequestContext>,
    ) -> (bool, String) {
        let delivery_id = delivery_id(context);

        let request = match Request::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(delivery_id = %delivery_id, error = %e, "Rejected request");
                return (false, e.to_string());
            }
        };

        let mut issues = Vec::new();
        for asset in request.assets() {
            let path = match usable_asset_path(asset) {
                Ok(path) => path,
                Err(e) => {
                    issues.push(AssetIssue::new(asset, e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self.storage.check_file(path).await {
                issues.push(AssetIssue::new(asset, e.to_string()));
            }
        }

        if !issues.is_empty() {
            let details: Vec<String> = issues.iter().map(ToString::to_string).collect();
            let message = format!("{}: {}", INPUT_FILES_NOT_FOUND, details.join("; "));
            warn!(
                delivery_id = %delivery_id,
                request_id = %request.request_id,
                issues = issues.len(),
                "Rejected request"
            );
            return (false, message);
        }

        let mut message = format!(
            "Request {} is valid: {} input file(s) found",
            request.request_id,
            request.assets().len()
        );
        if let Some(note) = self.describe_metadata(&request).await {
            message.push_str("; ");
            message.push_str(&note);
        }

        debug!(delivery_id = %delivery_id, request_id = %request.request_id, "Request accepted");
        (true, message)
    }

    /// Lists the metadata entries present for the request. Informational only.
    async fn describe_metadata(&self, request: &Request) -> Option<String> {
        let store = self.metadata.as_ref()?;
        let prefix = request.metadata_key_prefix();
        let pattern = format!("{}_*", escape_glob(&prefix));

        let keys = match store.get_matched_keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Metadata lookup failed");
                return Some("metadata unavailable".to_string());
            }
        };

        let found: Vec<&str> = METADATA_SUFFIXES
            .iter()
            .copied()
            .filter(|suffix| keys.contains(&request.metadata_key(suffix)))
            .collect();

        if found.is_empty() {
            Some(format!("no metadata found for '{}'", prefix))
        } else {
            Some(format!("metadata: {}", found.join(", ")))
        }
    }

    /// Submits the request's pipeline and waits for it to finish.
    ///
    /// Authenticates once, resolves the endpoint once, submits once and tags
    /// the run once.
    ///
    /// # Errors
    ///
    /// Runtime errors are returned unchanged; an authentication failure stays
    /// `PipelineError::Authentication` with its original message.
    pub async fn call_pipeline(&self, request: &Request) -> Result<SubmittedRun, PipelineError> {
        let conventions = self.conventions.build_conventions(request);
        let parameters = self.conventions.build_parameters(request);
        let display_name = self.conventions.build_display_name(request);

        let workspace = match self.runtime.connect(&self.credentials, &self.locator).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(
                    request_id = %request.request_id,
                    workspace = %self.locator.workspace_name,
                    error = %e,
                    "Workspace connection failed"
                );
                return Err(e);
            }
        };

        let pipeline_name = conventions.pipeline_name();
        let endpoint = self.runtime.get_endpoint(&workspace, &pipeline_name).await?;

        let submission = PipelineSubmission {
            experiment_name: conventions.experiment_name(),
            parameters: parameters.to_map(),
            display_name,
        };

        let started = Instant::now();
        let run = self.runtime.submit(&endpoint, &submission).await?;
        info!(
            request_id = %request.request_id,
            run_id = %run.run_id,
            pipeline = %pipeline_name,
            experiment = %submission.experiment_name,
            "Pipeline run submitted"
        );

        self.runtime.set_tags(&run, &conventions.cis_tags()).await?;

        let status = self
            .runtime
            .wait_for_completion(&run, self.show_output)
            .await?;
        let duration = started.elapsed();

        self.metrics
            .record_pipeline_run(&status.to_string(), duration.as_secs_f64());
        info!(
            request_id = %request.request_id,
            run_id = %run.run_id,
            status = %status,
            duration_secs = duration.as_secs(),
            "Pipeline run finished"
        );

        Ok(SubmittedRun {
            run_id: run.run_id,
            pipeline_name,
            experiment_name: submission.experiment_name,
            status,
            duration,
        })
    }

    /// Executes a request and maps the run to a status and message.
    ///
    /// - unparseable payload: `(false, InvalidRequest)`
    /// - no cached entry for the request: `(false, NotFoundInCache)`
    /// - otherwise the terminal run status: completed, failed or canceled
    pub async fn ml_exec_request(
        &self,
        payload: &Value,
        context: Option<&RequestContext>,
    ) -> Result<(bool, PipelineMessage), WorkerError> {
        match self.admit(payload, context).await? {
            Ok(request) => {
                let (status, message, _) = self.run(&request).await?;
                Ok((status, message))
            }
            Err(message) => Ok((false, message)),
        }
    }

    /// Decodes the request and looks up its cached entry.
    ///
    /// The inner `Err` is the message to report when the request cannot be
    /// executed; the outer one is a store failure.
    async fn admit(
        &self,
        payload: &Value,
        context: Option<&RequestContext>,
    ) -> Result<Result<Request, PipelineMessage>, WorkerError> {
        let delivery_id = delivery_id(context);

        let request = match Request::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(delivery_id = %delivery_id, error = %e, "Cannot execute request");
                return Ok(Err(PipelineMessage::InvalidRequest));
            }
        };

        let cache_key = request.request_cache_key();
        if self.cache.get_value(&cache_key).await?.is_none() {
            warn!(
                delivery_id = %delivery_id,
                request_id = %request.request_id,
                cache_key = %cache_key,
                "Request not found in cache"
            );
            return Ok(Err(PipelineMessage::NotFoundInCache));
        }

        Ok(Ok(request))
    }

    async fn run(
        &self,
        request: &Request,
    ) -> Result<(bool, PipelineMessage, SubmittedRun), PipelineError> {
        let run = self.call_pipeline(request).await?;
        let (status, message) =
            PipelineMessage::for_status(run.status).unwrap_or((false, PipelineMessage::Failed));
        Ok((status, message, run))
    }

    /// Runs one request through its whole lifecycle.
    ///
    /// A request only enters `Submitted` once it is handed to the runtime;
    /// anything refused before that ends in `Rejected`. Errors do not
    /// escape: they end the request in `Failed` with the error text
    /// recorded. Nothing is retried.
    pub async fn handle(&self, payload: &Value, context: Option<&RequestContext>) -> RequestOutcome {
        let started = Instant::now();
        let delivery_id = delivery_id(context);
        let request_id = payload
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.metrics.inc_requests_in_progress();
        let mut state = RequestState::Received;
        transition(&mut state, RequestState::Validating, &request_id, delivery_id);

        let (accepted, message) = self.validate_request(payload, context).await;
        let admitted = if accepted {
            self.admit(payload, context).await.map(|r| r.map_err(|m| m.to_string()))
        } else {
            Ok(Err(message))
        };

        let outcome = match admitted {
            Ok(Err(message)) => {
                self.metrics.record_rejection();
                transition(&mut state, RequestState::Rejected, &request_id, delivery_id);
                RequestOutcome::new(&request_id, state, false, message, started.elapsed())
            }
            Ok(Ok(request)) => {
                transition(&mut state, RequestState::Submitted, &request_id, delivery_id);
                match self.run(&request).await {
                    Ok((status, message, run)) => {
                        let next = if status {
                            RequestState::Completed
                        } else {
                            RequestState::Failed
                        };
                        transition(&mut state, next, &request_id, delivery_id);
                        RequestOutcome::new(
                            &request_id,
                            state,
                            status,
                            message.to_string(),
                            started.elapsed(),
                        )
                        .with_run_id(run.run_id)
                    }
                    Err(e) => self.failed(&mut state, &request_id, delivery_id, e.into(), started),
                }
            }
            Err(e) => self.failed(&mut state, &request_id, delivery_id, e, started),
        };

        self.metrics.dec_requests_in_progress();
        self.metrics.record_request(outcome.state.as_str());
        outcome
    }

    fn failed(
        &self,
        state: &mut RequestState,
        request_id: &str,
        delivery_id: &str,
        error: WorkerError,
        started: Instant,
    ) -> RequestOutcome {
        error!(
            delivery_id = %delivery_id,
            request_id = %request_id,
            error = %error,
            "Request execution failed"
        );
        transition(state, RequestState::Failed, request_id, delivery_id);
        RequestOutcome::new(
            request_id,
            *state,
            false,
            PipelineMessage::Failed.to_string(),
            started.elapsed(),
        )
        .with_error(error.to_string())
    }
}

impl Worker<TrainingConventions> {
    /// Builds the training worker and its production collaborators.
    ///
    /// # Errors
    ///
    /// Fails when Azure ML settings are incomplete or a Redis store cannot
    /// be reached.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        config.azureml.ensure_complete()?;

        let cache = cache::connect(config.redis.caching_url.as_deref()).await?;
        let mut worker = Self::new(
            TrainingConventions::from_config(config),
            storage::from_settings(&config.storage),
            cache,
            Arc::new(AzureMlRuntime::from_settings(&config.azureml)),
            &config.azureml,
        );

        if let Some(url) = config.redis.metadata_url.as_deref() {
            worker = worker.with_metadata_store(Arc::new(RedisStore::connect(url).await?));
        }

        Ok(worker)
    }
}

fn delivery_id(context: Option<&RequestContext>) -> &str {
    context.map_or("-", |c| c.delivery_id.as_str())
}

fn transition(state: &mut RequestState, next: RequestState, request_id: &str, delivery_id: &str) {
    debug_assert!(state.can_transition_to(next), "{} -> {}", state, next);
    debug!(
        delivery_id = %delivery_id,
        request_id = %request_id,
        from = %state,
        to = %next,
        "Request state transition"
    );
    *state = next;
}
