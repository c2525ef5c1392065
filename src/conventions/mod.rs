//! Naming and tagging conventions for pipeline invocations.
//!
//! A [`PipelineConventions`] value carries everything needed to derive the
//! pipeline endpoint name, the experiment name and the CIS tags for one
//! request. Worker flavors differ only in how they build these values, which
//! is captured by the [`PipelineConventionsBuilder`] hooks.
//!
//! # Naming
//!
//! - pipeline name: `{environment}_{application}_{pipeline_country}_{pipeline_suffix}`
//! - experiment name: `{environment}_{application}_{consumer}_{pipeline_suffix}`
//!
//! Both are lower-cased; experiment names additionally replace characters
//! the workspace does not accept with `_`.

mod training;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::Request;

pub use training::TrainingConventions;

/// Conventions used to invoke one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConventions {
    /// Deployment environment.
    pub environment: String,
    /// The request payload as received.
    pub input_json: Value,
    /// Country tag used in the pipeline name.
    pub pipeline_country: String,
    /// Suffix identifying the pipeline flavor.
    pub pipeline_suffix: String,
}

impl PipelineConventions {
    pub fn new(
        environment: impl Into<String>,
        input_json: Value,
        pipeline_country: impl Into<String>,
        pipeline_suffix: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            input_json,
            pipeline_country: pipeline_country.into(),
            pipeline_suffix: pipeline_suffix.into(),
        }
    }

    fn field(&self, key: &str) -> &str {
        self.input_json
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn characteristic(&self) -> &str {
        self.input_json
            .get("characteristics")
            .and_then(Value::as_array)
            .and_then(|chars| chars.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Name of the published pipeline endpoint to invoke.
    pub fn pipeline_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.environment,
            self.field("application"),
            self.pipeline_country,
            self.pipeline_suffix
        )
        .to_lowercase()
    }

    /// Experiment the run is recorded under.
    pub fn experiment_name(&self) -> String {
        let raw = format!(
            "{}_{}_{}_{}",
            self.environment,
            self.field("application"),
            self.field("consumer"),
            self.pipeline_suffix
        );
        raw.to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Fixed set of traceability tags attached to every run.
    pub fn cis_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("cis_env".to_string(), self.environment.clone());
        tags.insert(
            "cis_request_id".to_string(),
            self.field("requestId").to_string(),
        );
        tags.insert(
            "cis_application".to_string(),
            self.field("application").to_string(),
        );
        tags.insert(
            "cis_consumer".to_string(),
            self.field("consumer").to_string(),
        );
        tags.insert("cis_country".to_string(), self.field("country").to_string());
        tags.insert("cis_client".to_string(), self.field("client").to_string());
        tags.insert(
            "cis_characteristic".to_string(),
            self.characteristic().to_string(),
        );
        tags.insert("cis_pipeline".to_string(), self.pipeline_name());
        tags
    }
}

/// Parameters passed to the pipeline endpoint on submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineParameters {
    pub environment: String,
    pub country: String,
    pub request_id: String,
}

impl PipelineParameters {
    /// Parameters as the flat string map the runtime expects.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("environment".to_string(), self.environment.clone()),
            ("country".to_string(), self.country.clone()),
            ("request_id".to_string(), self.request_id.clone()),
        ])
    }
}

/// Hooks a worker flavor implements to describe its pipeline invocation.
pub trait PipelineConventionsBuilder: Send + Sync {
    /// The conventions used to call the pipeline.
    fn build_conventions(&self, request: &Request) -> PipelineConventions;

    /// Custom run name shown in the workspace UI, if any.
    fn build_display_name(&self, request: &Request) -> Option<String>;

    /// The parameters used to invoke the pipeline endpoint.
    fn build_parameters(&self, request: &Request) -> PipelineParameters;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conventions() -> PipelineConventions {
        PipelineConventions::new(
            "rnd",
            json!({
                "requestId": "12345",
                "application": "App",
                "consumer": "Some Consumer",
                "country": "US",
                "client": "OGRDS",
                "characteristics": ["char", "other"],
            }),
            "any",
            "pipeline",
        )
    }

    #[test]
    fn test_pipeline_name() {
        assert_eq!(conventions().pipeline_name(), "rnd_app_any_pipeline");
    }

    #[test]
    fn test_experiment_name_is_sanitized() {
        assert_eq!(
            conventions().experiment_name(),
            "rnd_app_some_consumer_pipeline"
        );
    }

    #[test]
    fn test_cis_tags() {
        let tags = conventions().cis_tags();
        assert_eq!(tags.len(), 8);
        assert_eq!(tags["cis_env"], "rnd");
        assert_eq!(tags["cis_request_id"], "12345");
        assert_eq!(tags["cis_country"], "US");
        assert_eq!(tags["cis_characteristic"], "char");
        assert_eq!(tags["cis_pipeline"], "rnd_app_any_pipeline");
    }

    #[test]
    fn test_missing_fields_render_empty() {
        let conventions = PipelineConventions::new("dev", json!({}), "any", "x");
        assert_eq!(conventions.pipeline_name(), "dev__any_x");
        assert_eq!(conventions.cis_tags()["cis_request_id"], "");
    }

    #[test]
    fn test_parameters_map() {
        let params = PipelineParameters {
            environment: "rnd".to_string(),
            country: "US".to_string(),
            request_id: "12345".to_string(),
        };
        let map = params.to_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["request_id"], "12345");
    }
}
