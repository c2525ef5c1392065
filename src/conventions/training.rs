//! Conventions for the data-prediction training pipeline.

use crate::config::WorkerConfig;
use crate::request::Request;

use super::{PipelineConventions, PipelineConventionsBuilder, PipelineParameters};

/// Builder for the training worker.
///
/// The country used in pipeline names is a fixed placeholder taken from
/// configuration, not the request's country.
#[derive(Debug, Clone)]
pub struct TrainingConventions {
    environment: String,
    pipeline_country: String,
    pipeline_suffix: String,
}

impl TrainingConventions {
    pub fn new(
        environment: impl Into<String>,
        pipeline_country: impl Into<String>,
        pipeline_suffix: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            pipeline_country: pipeline_country.into(),
            pipeline_suffix: pipeline_suffix.into(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            &config.environment,
            &config.pipeline_country,
            &config.pipeline_suffix,
        )
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl PipelineConventionsBuilder for TrainingConventions {
    fn build_conventions(&self, request: &Request) -> PipelineConventions {
        PipelineConventions::new(
            &self.environment,
            request.raw().clone(),
            &self.pipeline_country,
            &self.pipeline_suffix,
        )
    }

    fn build_display_name(&self, request: &Request) -> Option<String> {
        Some(format!(
            "{}-{}-{}",
            request.application, request.consumer, request.request_id
        ))
    }

    fn build_parameters(&self, request: &Request) -> PipelineParameters {
        PipelineParameters {
            environment: self.environment.clone(),
            country: request.country.clone(),
            request_id: request.request_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Request {
        Request::from_value(&json!({
            "requestId": "12345",
            "application": "APP",
            "consumer": "CONSUMER",
            "country": "US",
            "client": "CLIENT",
            "characteristics": ["char"],
        }))
        .expect("request should decode")
    }

    #[test]
    fn test_parameters_use_request_country() {
        let builder = TrainingConventions::new("rnd", "any", "pipeline_test");
        let params = builder.build_parameters(&request());

        assert_eq!(
            params,
            PipelineParameters {
                environment: "rnd".to_string(),
                country: "US".to_string(),
                request_id: "12345".to_string(),
            }
        );
    }

    #[test]
    fn test_conventions_use_placeholder_country() {
        let builder = TrainingConventions::from_config(&WorkerConfig::default());
        let conventions = builder.build_conventions(&request());

        assert_eq!(conventions.pipeline_country, "any");
        assert_eq!(conventions.pipeline_name(), "rnd_app_any_pipeline_test");
        assert_eq!(conventions.input_json["requestId"], "12345");
    }

    #[test]
    fn test_display_name() {
        let builder = TrainingConventions::new("rnd", "any", "pipeline_test");
        assert_eq!(
            builder.build_display_name(&request()).as_deref(),
            Some("APP-CONSUMER-12345")
        );
    }
}
