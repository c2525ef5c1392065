//! Azure Machine Learning runtime over REST.
//!
//! Authentication uses the Azure AD client-credentials flow. The workspace
//! is looked up through ARM to find its region; pipeline endpoints and runs
//! are then addressed on the regional `api.azureml.ms` service.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    EndpointHandle, PipelineRuntime, PipelineSubmission, RunHandle, RunStatus,
    ServicePrincipalCredentials, WorkspaceHandle, WorkspaceLocator,
};
use crate::config::AzureMlSettings;
use crate::error::PipelineError;

const ARM_API_VERSION: &str = "2023-04-01";

/// Tokens this close to expiry are renewed before the next call.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// An access token and, when known, its expiry.
#[derive(Debug, Clone)]
struct IssuedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Client for published pipelines in an Azure ML workspace.
pub struct AzureMlRuntime {
    authority_host: String,
    management_endpoint: String,
    poll_interval: Duration,
    http_client: Client,
}

impl AzureMlRuntime {
    /// Create a runtime client.
    ///
    /// # Arguments
    ///
    /// * `authority_host` - Azure AD authority (e.g., "https://login.microsoftonline.com")
    /// * `management_endpoint` - ARM endpoint (e.g., "https://management.azure.com")
    /// * `poll_interval` - Delay between run status polls
    pub fn new(authority_host: &str, management_endpoint: &str, poll_interval: Duration) -> Self {
        Self {
            authority_host: authority_host.trim_end_matches('/').to_string(),
            management_endpoint: management_endpoint.trim_end_matches('/').to_string(),
            poll_interval,
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_settings(settings: &AzureMlSettings) -> Self {
        Self::new(
            &settings.authority_host,
            &settings.management_endpoint,
            settings.poll_interval(),
        )
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant_id)
    }

    fn token_scope(&self) -> String {
        format!("{}/.default", self.management_endpoint)
    }

    fn workspace_url(&self, locator: &WorkspaceLocator) -> String {
        format!("{}{}", self.management_endpoint, locator.resource_path())
    }

    fn pipelines_url(workspace: &WorkspaceHandle) -> String {
        format!(
            "{}/pipelines/v1.0{}",
            workspace.api_base,
            workspace.locator.resource_path()
        )
    }

    fn run_url(run: &RunHandle) -> Result<Url, PipelineError> {
        let base = format!(
            "{}/history/v1.0{}",
            run.workspace.api_base,
            run.workspace.locator.resource_path()
        );
        service_url(
            &base,
            &["experiments", &run.experiment_name, "runs", &run.run_id],
        )
    }

    async fn send(request: RequestBuilder) -> Result<Response, PipelineError> {
        request
            .send()
            .await
            .map_err(|e| PipelineError::RequestFailed(e.to_string()))
    }

    async fn fetch_token(
        &self,
        credentials: &ServicePrincipalCredentials,
    ) -> Result<IssuedToken, PipelineError> {
        let scope = self.token_scope();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.service_principal_id.as_str()),
            (
                "client_secret",
                credentials.service_principal_password.as_str(),
            ),
            ("scope", scope.as_str()),
        ];

        let response = Self::send(
            self.http_client
                .post(self.token_url(&credentials.tenant_id))
                .form(&form),
        )
        .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Authentication(auth_error_message(&body)));
        }

        let token: TokenResponse = parse_json(check_status(response).await?).await?;
        Ok(IssuedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        })
    }
}

#[async_trait]
impl PipelineRuntime for AzureMlRuntime {
    async fn connect(
        &self,
        credentials: &ServicePrincipalCredentials,
        locator: &WorkspaceLocator,
    ) -> Result<WorkspaceHandle, PipelineError> {
        let token = self.fetch_token(credentials).await?;

        let response = Self::send(
            self.http_client
                .get(self.workspace_url(locator))
                .query(&[("api-version", ARM_API_VERSION)])
                .bearer_auth(&token.access_token),
        )
        .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(PipelineError::WorkspaceNotFound(
                    locator.workspace_name.clone(),
                ))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PipelineError::Authentication(format!(
                    "service principal has no access to workspace '{}'",
                    locator.workspace_name
                )))
            }
            _ => {}
        }

        let workspace: ArmWorkspace = parse_json(check_status(response).await?).await?;
        let api_base = format!(
            "https://{}.api.azureml.ms",
            workspace.location.to_lowercase().replace(' ', "")
        );
        debug!(workspace = %locator.workspace_name, api_base = %api_base, "Connected to workspace");

        Ok(WorkspaceHandle {
            locator: locator.clone(),
            api_base,
            access_token: token.access_token,
            token_expires_at: token.expires_at,
            credentials: credentials.clone(),
        })
    }

    async fn get_endpoint(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<EndpointHandle, PipelineError> {
        let url = service_url(
            &Self::pipelines_url(workspace),
            &["PipelineEndpoints", "Name", name],
        )?;
        let response =
            Self::send(self.http_client.get(url).bearer_auth(&workspace.access_token)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::EndpointNotFound(name.to_string()));
        }

        let endpoint: PipelineEndpointResponse =
            parse_json(check_status(response).await?).await?;
        Ok(EndpointHandle {
            id: endpoint.id,
            name: endpoint.name,
            workspace: workspace.clone(),
        })
    }

    async fn submit(
        &self,
        endpoint: &EndpointHandle,
        submission: &PipelineSubmission,
    ) -> Result<RunHandle, PipelineError> {
        let url = service_url(
            &Self::pipelines_url(&endpoint.workspace),
            &["PipelineRuns", "PipelineEndpointSubmit", "Id", &endpoint.id],
        )?;
        let body = SubmitRequest {
            experiment_name: &submission.experiment_name,
            parameter_assignments: &submission.parameters,
            display_name: submission.display_name.as_deref(),
            run_source: "SDK",
        };

        let response = Self::send(
            self.http_client
                .post(url)
                .bearer_auth(&endpoint.workspace.access_token)
                .json(&body),
        )
        .await?;

        let run: SubmitResponse = parse_json(
            check_status(response)
                .await
                .map_err(|e| PipelineError::SubmissionFailed(e.to_string()))?,
        )
        .await?;

        info!(
            run_id = %run.id,
            endpoint = %endpoint.name,
            experiment = %submission.experiment_name,
            "Submitted pipeline run"
        );

        Ok(RunHandle {
            run_id: run.id,
            experiment_name: submission.experiment_name.clone(),
            workspace: endpoint.workspace.clone(),
        })
    }

    async fn set_tags(
        &self,
        run: &RunHandle,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let response = Self::send(
            self.http_client
                .patch(Self::run_url(run)?)
                .bearer_auth(&run.workspace.access_token)
                .json(&TagsRequest { tags }),
        )
        .await?;

        check_status(response)
            .await
            .map_err(|e| PipelineError::TaggingFailed {
                run_id: run.run_id.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_completion(
        &self,
        run: &RunHandle,
        show_output: bool,
    ) -> Result<RunStatus, PipelineError> {
        let url = Self::run_url(run)?;
        let mut token = IssuedToken {
            access_token: run.workspace.access_token.clone(),
            expires_at: run.workspace.token_expires_at,
        };
        let mut renewed_after_rejection = false;
        let mut last_status: Option<RunStatus> = None;

        loop {
            if token_needs_refresh(token.expires_at, Utc::now()) {
                debug!(run_id = %run.run_id, "Renewing access token before it expires");
                token = self.fetch_token(&run.workspace.credentials).await?;
            }

            let response = Self::send(
                self.http_client
                    .get(url.clone())
                    .bearer_auth(&token.access_token),
            )
            .await?;

            // One renewal per rejection; a second 401 in a row is an error.
            if response.status() == StatusCode::UNAUTHORIZED && !renewed_after_rejection {
                warn!(run_id = %run.run_id, "Access token rejected while polling; renewing");
                token = self.fetch_token(&run.workspace.credentials).await?;
                renewed_after_rejection = true;
                continue;
            }
            renewed_after_rejection = false;

            let details: RunDetails = parse_json(check_status(response).await.map_err(|e| {
                PipelineError::StatusFailed {
                    run_id: run.run_id.clone(),
                    message: e.to_string(),
                }
            })?)
            .await?;
            let status = RunStatus::parse(&details.status);

            if last_status != Some(status) {
                if show_output {
                    info!(run_id = %run.run_id, status = %status, "Pipeline run status");
                } else {
                    debug!(run_id = %run.run_id, status = %status, "Pipeline run status");
                }
                last_status = Some(status);
            }

            if status.is_terminal() {
                return Ok(status);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Appends `segments` to `base`, each percent-encoded as one path segment.
fn service_url(base: &str, segments: &[&str]) -> Result<Url, PipelineError> {
    let mut url = Url::parse(base)
        .map_err(|e| PipelineError::RequestFailed(format!("invalid URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| PipelineError::RequestFailed(format!("URL '{}' cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn token_needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|at| at - now <= chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS))
}

/// Message of a rejected token request: the AAD `error_description`, the
/// bare `error` code, or the raw body.
fn auth_error_message(body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(e) => e.error_description.unwrap_or(e.error),
        Err(_) if body.trim().is_empty() => "token request rejected".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Turns a non-success response into `PipelineError::ApiError`.
async fn check_status(response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(PipelineError::ApiError { code, message })
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, PipelineError> {
    response
        .json::<T>()
        .await
        .map_err(|e| PipelineError::ParseError(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmWorkspace {
    location: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PipelineEndpointResponse {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitRequest<'a> {
    experiment_name: &'a str,
    parameter_assignments: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    run_source: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct TagsRequest<'a> {
    tags: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RunDetails {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
