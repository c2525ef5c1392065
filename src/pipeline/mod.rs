//! External ML pipeline runtime.
//!
//! The worker drives published pipelines through [`PipelineRuntime`], a
//! narrow interface over the runtime's client operations:
//!
//! 1. **connect**: authenticate a service principal and open a workspace
//! 2. **get_endpoint**: resolve a published pipeline endpoint by name
//! 3. **submit**: start a run under an experiment with parameters
//! 4. **set_tags**: attach traceability tags to the run
//! 5. **wait_for_completion**: block until the run reaches a terminal state
//!
//! [`AzureMlRuntime`] implements it against the Azure Machine Learning REST
//! APIs. Tests substitute in-memory fakes.

mod azureml;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AzureMlSettings;
use crate::error::PipelineError;

pub use azureml::AzureMlRuntime;

/// Service principal used to authenticate against the workspace.
#[derive(Clone, PartialEq, Eq)]
pub struct ServicePrincipalCredentials {
    pub tenant_id: String,
    pub service_principal_id: String,
    pub service_principal_password: String,
}

impl ServicePrincipalCredentials {
    pub fn from_settings(settings: &AzureMlSettings) -> Self {
        Self {
            tenant_id: settings.tenant_id.clone(),
            service_principal_id: settings.service_principal_id.clone(),
            service_principal_password: settings.service_principal_secret.clone(),
        }
    }
}

impl fmt::Debug for ServicePrincipalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("service_principal_id", &self.service_principal_id)
            .field("service_principal_password", &"<redacted>")
            .finish()
    }
}

/// Identifies an ML workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLocator {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
}

impl WorkspaceLocator {
    pub fn from_settings(settings: &AzureMlSettings) -> Self {
        Self {
            subscription_id: settings.subscription_id.clone(),
            resource_group: settings.resource_group.clone(),
            workspace_name: settings.workspace_name.clone(),
        }
    }

    /// ARM resource path of the workspace.
    pub fn resource_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.subscription_id, self.resource_group, self.workspace_name
        )
    }
}

/// An authenticated workspace session.
#[derive(Clone)]
pub struct WorkspaceHandle {
    pub locator: WorkspaceLocator,
    /// Base URL of the workspace's regional service endpoint.
    pub api_base: String,
    pub access_token: String,
    /// When `access_token` expires. `None` if the issuer did not say.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Kept so the token can be renewed while waiting on long runs.
    pub credentials: ServicePrincipalCredentials,
}

impl fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("locator", &self.locator)
            .field("api_base", &self.api_base)
            .field("access_token", &"<redacted>")
            .field("token_expires_at", &self.token_expires_at)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// A published pipeline endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    pub id: String,
    pub name: String,
    pub workspace: WorkspaceHandle,
}

/// What to submit to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSubmission {
    pub experiment_name: String,
    pub parameters: BTreeMap<String, String>,
    pub display_name: Option<String>,
}

/// A submitted pipeline run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment_name: String,
    pub workspace: WorkspaceHandle,
}

/// Lifecycle state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Maps a runtime status string to a run status.
    ///
    /// Preparation states count as queued; finalizing and cancel-requested
    /// count as running. Unknown states are treated as running.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "notstarted" | "not_started" => Self::NotStarted,
            "queued" | "preparing" | "starting" | "provisioning" => Self::Queued,
            "completed" | "finished" => Self::Completed,
            "failed" | "notresponding" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// Message returned alongside the status of a request execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineMessage {
    #[serde(rename = "pipeline completed")]
    Completed,
    #[serde(rename = "pipeline failed")]
    Failed,
    #[serde(rename = "pipeline canceled")]
    Canceled,
    #[serde(rename = "invalid request")]
    InvalidRequest,
    #[serde(rename = "request not found in cache")]
    NotFoundInCache,
}

impl PipelineMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "pipeline completed",
            Self::Failed => "pipeline failed",
            Self::Canceled => "pipeline canceled",
            Self::InvalidRequest => "invalid request",
            Self::NotFoundInCache => "request not found in cache",
        }
    }

    /// Status and message for a terminal run status.
    ///
    /// Returns `None` for non-terminal states.
    pub fn for_status(status: RunStatus) -> Option<(bool, Self)> {
        match status {
            RunStatus::Completed => Some((true, Self::Completed)),
            RunStatus::Failed => Some((false, Self::Failed)),
            RunStatus::Canceled => Some((false, Self::Canceled)),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client operations of an ML pipeline runtime.
#[async_trait]
pub trait PipelineRuntime: Send + Sync {
    /// Authenticates and opens the workspace.
    ///
    /// Credential failures must be reported as `PipelineError::Authentication`.
    async fn connect(
        &self,
        credentials: &ServicePrincipalCredentials,
        locator: &WorkspaceLocator,
    ) -> Result<WorkspaceHandle, PipelineError>;

    /// Resolves a published pipeline endpoint by name.
    async fn get_endpoint(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<EndpointHandle, PipelineError>;

    /// Submits a run to the endpoint's default pipeline.
    async fn submit(
        &self,
        endpoint: &EndpointHandle,
        submission: &PipelineSubmission,
    ) -> Result<RunHandle, PipelineError>;

    /// Attaches tags to a run.
    async fn set_tags(
        &self,
        run: &RunHandle,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError>;

    /// Blocks until the run reaches a terminal state and returns it.
    async fn wait_for_completion(
        &self,
        run: &RunHandle,
        show_output: bool,
    ) -> Result<RunStatus, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_parse() {
        assert_eq!(RunStatus::parse("NotStarted"), RunStatus::NotStarted);
        assert_eq!(RunStatus::parse("Preparing"), RunStatus::Queued);
        assert_eq!(RunStatus::parse("Running"), RunStatus::Running);
        assert_eq!(RunStatus::parse("Finalizing"), RunStatus::Running);
        assert_eq!(RunStatus::parse("Completed"), RunStatus::Completed);
        assert_eq!(RunStatus::parse("Failed"), RunStatus::Failed);
        assert_eq!(RunStatus::parse("Canceled"), RunStatus::Canceled);
        assert_eq!(RunStatus::parse("Cancelled"), RunStatus::Canceled);
        assert_eq!(RunStatus::parse("SomethingNew"), RunStatus::Running);
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_message_for_status() {
        assert_eq!(
            PipelineMessage::for_status(RunStatus::Completed),
            Some((true, PipelineMessage::Completed))
        );
        assert_eq!(
            PipelineMessage::for_status(RunStatus::Failed),
            Some((false, PipelineMessage::Failed))
        );
        assert_eq!(
            PipelineMessage::for_status(RunStatus::Canceled),
            Some((false, PipelineMessage::Canceled))
        );
        assert_eq!(PipelineMessage::for_status(RunStatus::Running), None);
    }

    #[test]
    fn test_message_text() {
        assert_eq!(PipelineMessage::Completed.to_string(), "pipeline completed");
        assert_eq!(
            PipelineMessage::NotFoundInCache.to_string(),
            "request not found in cache"
        );
        assert_eq!(
            serde_json::to_string(&PipelineMessage::InvalidRequest).expect("serialize"),
            "\"invalid request\""
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = ServicePrincipalCredentials {
            tenant_id: "tenant".to_string(),
            service_principal_id: "sp".to_string(),
            service_principal_password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("tenant"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_workspace_resource_path() {
        let locator = WorkspaceLocator {
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            workspace_name: "ws".to_string(),
        };
        assert_eq!(
            locator.resource_path(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws"
        );
    }
}
