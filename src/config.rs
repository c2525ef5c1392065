//! Worker configuration.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables. Secrets (service principal secret, SAS
//! token) are redacted from `Debug` output and from [`WorkerConfig::redacted`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder shown instead of secret values.
const REDACTED: &str = "***";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing or blank.
    #[error("Missing setting(s): {0}")]
    MissingSetting(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The YAML configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level configuration for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deployment environment (e.g. "rnd", "dev", "prod").
    pub environment: String,
    /// Country tag used in pipeline names. Fixed placeholder for this worker flavor.
    pub pipeline_country: String,
    /// Suffix identifying the pipeline flavor.
    pub pipeline_suffix: String,
    /// Azure Machine Learning workspace and credentials.
    pub azureml: AzureMlSettings,
    /// Redis connections for metadata, request caching and the request queue.
    pub redis: RedisSettings,
    /// Input file storage backend.
    pub storage: StorageSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            environment: "rnd".to_string(),
            pipeline_country: "any".to_string(),
            pipeline_suffix: "pipeline_test".to_string(),
            azureml: AzureMlSettings::default(),
            redis: RedisSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

/// Azure ML workspace location and service principal credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AzureMlSettings {
    pub tenant_id: String,
    pub service_principal_id: String,
    pub service_principal_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
    /// Azure AD authority used for the client-credentials flow.
    pub authority_host: String,
    /// Azure Resource Manager endpoint.
    pub management_endpoint: String,
    /// Interval between run status polls while waiting for completion.
    pub poll_interval_secs: u64,
    /// Log intermediate run statuses while waiting.
    pub show_output: bool,
}

impl Default for AzureMlSettings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            service_principal_id: String::new(),
            service_principal_secret: String::new(),
            subscription_id: String::new(),
            resource_group: String::new(),
            workspace_name: String::new(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            management_endpoint: "https://management.azure.com".to_string(),
            poll_interval_secs: 15,
            show_output: true,
        }
    }
}

impl fmt::Debug for AzureMlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureMlSettings")
            .field("tenant_id", &self.tenant_id)
            .field("service_principal_id", &self.service_principal_id)
            .field("service_principal_secret", &REDACTED)
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("workspace_name", &self.workspace_name)
            .field("authority_host", &self.authority_host)
            .field("management_endpoint", &self.management_endpoint)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("show_output", &self.show_output)
            .finish()
    }
}

impl AzureMlSettings {
    /// Interval between run status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Checks that every credential and workspace coordinate is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSetting` listing every blank field.
    pub fn ensure_complete(&self) -> Result<(), ConfigError> {
        let required = [
            ("azureml.tenant_id", &self.tenant_id),
            ("azureml.service_principal_id", &self.service_principal_id),
            ("azureml.service_principal_secret", &self.service_principal_secret),
            ("azureml.subscription_id", &self.subscription_id),
            ("azureml.resource_group", &self.resource_group),
            ("azureml.workspace_name", &self.workspace_name),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingSetting(missing.join(", ")))
        }
    }
}

/// Redis connection settings. A `None` URL selects an in-process store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisSettings {
    /// Store holding per-consumer metadata (`model`, `service`, `property`).
    pub metadata_url: Option<String>,
    /// Store holding cached request payloads.
    pub caching_url: Option<String>,
    /// Redis instance hosting the request queue.
    pub queue_url: String,
    /// Name of the request queue.
    pub queue_name: String,
    /// Blocking dequeue timeout, also used as the back-off after queue errors.
    pub poll_interval_secs: u64,
    /// Time allowed for the listener to finish its current request on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            metadata_url: Some("redis://localhost:6379/0".to_string()),
            caching_url: Some("redis://localhost:6379/1".to_string()),
            queue_url: "redis://localhost:6379/2".to_string(),
            queue_name: "datapred_requests".to_string(),
            poll_interval_secs: 1,
            shutdown_timeout_secs: 60,
        }
    }
}

impl RedisSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Where input files live.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageSettings {
    /// Files under a local directory.
    Local { root: PathBuf },
    /// Blobs in an Azure storage container, accessed with a SAS token.
    Blob {
        account_url: String,
        container: String,
        sas_token: String,
    },
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings::Local {
            root: PathBuf::from("."),
        }
    }
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSettings::Local { root } => {
                f.debug_struct("Local").field("root", root).finish()
            }
            StorageSettings::Blob {
                account_url,
                container,
                ..
            } => f
                .debug_struct("Blob")
                .field("account_url", account_url)
                .field("container", container)
                .field("sas_token", &REDACTED)
                .finish(),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it is not valid YAML for this schema.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parses configuration from a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Builds the effective configuration: optional file, then environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be loaded, an environment
    /// variable has an invalid value, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from defaults and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Applies environment overrides using the given lookup.
    ///
    /// # Environment Variables
    ///
    /// - `WORKER_ENV`, `WORKER_PIPELINE_COUNTRY`, `WORKER_PIPELINE_SUFFIX`
    /// - `AZUREML_TENANT_ID`, `AZUREML_SERVICE_PRINCIPAL_ID`,
    ///   `AZUREML_SERVICE_PRINCIPAL_SECRET`, `AZUREML_SUBSCRIPTION_ID`,
    ///   `AZUREML_RESOURCE_GROUP`, `AZUREML_WORKSPACE_NAME`,
    ///   `AZUREML_AUTHORITY_HOST`, `AZUREML_MANAGEMENT_ENDPOINT`,
    ///   `AZUREML_POLL_INTERVAL_SECS`, `AZUREML_SHOW_OUTPUT`
    /// - `REDIS_METADATA_URL`, `REDIS_CACHING_URL`, `REDIS_QUEUE_URL`,
    ///   `REDIS_QUEUE_NAME`, `REDIS_POLL_INTERVAL_SECS`,
    ///   `REDIS_SHUTDOWN_TIMEOUT_SECS`
    /// - `STORAGE_LOCAL_ROOT`, or `STORAGE_ACCOUNT_URL` + `STORAGE_CONTAINER`
    ///   + `STORAGE_SAS_TOKEN`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("WORKER_ENV") {
            self.environment = val;
        }
        if let Some(val) = lookup("WORKER_PIPELINE_COUNTRY") {
            self.pipeline_country = val;
        }
        if let Some(val) = lookup("WORKER_PIPELINE_SUFFIX") {
            self.pipeline_suffix = val;
        }

        let azureml = &mut self.azureml;
        let string_overrides: [(&str, &mut String); 8] = [
            ("AZUREML_TENANT_ID", &mut azureml.tenant_id),
            ("AZUREML_SERVICE_PRINCIPAL_ID", &mut azureml.service_principal_id),
            (
                "AZUREML_SERVICE_PRINCIPAL_SECRET",
                &mut azureml.service_principal_secret,
            ),
            ("AZUREML_SUBSCRIPTION_ID", &mut azureml.subscription_id),
            ("AZUREML_RESOURCE_GROUP", &mut azureml.resource_group),
            ("AZUREML_WORKSPACE_NAME", &mut azureml.workspace_name),
            ("AZUREML_AUTHORITY_HOST", &mut azureml.authority_host),
            ("AZUREML_MANAGEMENT_ENDPOINT", &mut azureml.management_endpoint),
        ];
        for (key, field) in string_overrides {
            if let Some(val) = lookup(key) {
                *field = val;
            }
        }
        if let Some(val) = lookup("AZUREML_POLL_INTERVAL_SECS") {
            azureml.poll_interval_secs = parse_env_value(&val, "AZUREML_POLL_INTERVAL_SECS")?;
        }
        if let Some(val) = lookup("AZUREML_SHOW_OUTPUT") {
            azureml.show_output = parse_env_bool(&val, "AZUREML_SHOW_OUTPUT")?;
        }

        if let Some(val) = lookup("REDIS_METADATA_URL") {
            self.redis.metadata_url = non_empty(val);
        }
        if let Some(val) = lookup("REDIS_CACHING_URL") {
            self.redis.caching_url = non_empty(val);
        }
        if let Some(val) = lookup("REDIS_QUEUE_URL") {
            self.redis.queue_url = val;
        }
        if let Some(val) = lookup("REDIS_QUEUE_NAME") {
            self.redis.queue_name = val;
        }
        if let Some(val) = lookup("REDIS_POLL_INTERVAL_SECS") {
            self.redis.poll_interval_secs = parse_env_value(&val, "REDIS_POLL_INTERVAL_SECS")?;
        }
        if let Some(val) = lookup("REDIS_SHUTDOWN_TIMEOUT_SECS") {
            self.redis.shutdown_timeout_secs =
                parse_env_value(&val, "REDIS_SHUTDOWN_TIMEOUT_SECS")?;
        }

        if let Some(root) = lookup("STORAGE_LOCAL_ROOT") {
            self.storage = StorageSettings::Local {
                root: PathBuf::from(root),
            };
        } else if let Some(account_url) = lookup("STORAGE_ACCOUNT_URL") {
            let container = lookup("STORAGE_CONTAINER")
                .ok_or_else(|| ConfigError::MissingSetting("STORAGE_CONTAINER".to_string()))?;
            let sas_token = lookup("STORAGE_SAS_TOKEN").unwrap_or_default();
            self.storage = StorageSettings::Blob {
                account_url,
                container,
                sas_token,
            };
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// Azure credentials are not required here; they are checked when the
    /// pipeline runtime is built, so validation-only commands work without them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "environment cannot be empty".to_string(),
            ));
        }

        if self.pipeline_suffix.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pipeline_suffix cannot be empty".to_string(),
            ));
        }

        if self.pipeline_country.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pipeline_country cannot be empty".to_string(),
            ));
        }

        if self.azureml.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "azureml.poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.redis.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "redis.poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.redis.queue_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis.queue_name cannot be empty".to_string(),
            ));
        }

        if let StorageSettings::Blob {
            account_url,
            container,
            ..
        } = &self.storage
        {
            if !account_url.starts_with("https://") && !account_url.starts_with("http://") {
                return Err(ConfigError::ValidationFailed(format!(
                    "storage account_url must be an http(s) URL, got '{}'",
                    account_url
                )));
            }
            if container.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "storage container cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Returns a copy safe to print: secrets are replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.azureml.service_principal_secret.is_empty() {
            copy.azureml.service_principal_secret = REDACTED.to_string();
        }
        if let StorageSettings::Blob { sas_token, .. } = &mut copy.storage {
            if !sas_token.is_empty() {
                *sas_token = REDACTED.to_string();
            }
        }
        copy
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parses an environment variable value to the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean environment variable value.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}
