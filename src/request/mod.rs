//! Inbound request model.
//!
//! A request arrives as a JSON record from the dispatcher. [`Request::from_value`]
//! checks the required top-level keys before decoding so that callers get a
//! diagnostic naming every missing key, and keeps the raw payload around for
//! the pipeline conventions.
//!
//! # Example
//!
//! ```ignore
//! use datapred_worker::request::Request;
//!
//! let payload = serde_json::json!({
//!     "requestId": "12345",
//!     "application": "APP",
//!     "consumer": "CONSUMER",
//!     "country": "US",
//!     "client": "CLIENT",
//!     "characteristics": ["char"],
//! });
//! let request = Request::from_value(&payload)?;
//! assert_eq!(request.request_cache_key(), "app_consumer_char_12345_us");
//! ```

pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RequestError;

pub use validation::{check_asset_path, usable_asset_path, AssetIssue};

/// Top-level keys every request must carry.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "requestId",
    "application",
    "consumer",
    "country",
    "client",
    "characteristics",
];

/// Suffixes of the per-consumer metadata entries.
pub const METADATA_SUFFIXES: [&str; 3] = ["model", "service", "property"];

/// An input file referenced by a request.
///
/// Decoding never fails: fields of the wrong type are left unset so that
/// validation can report the entry instead of rejecting the whole request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Asset {
    /// File name, used in diagnostics.
    pub name: String,
    /// Storage path of the file. `None` when absent or not a string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Column delimiter hint for tabular inputs (e.g. "comma").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl Asset {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            delimiter: None,
        }
    }

    /// Reads an asset entry of any JSON shape.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            name: text("name").unwrap_or_default(),
            path: text("path"),
            delimiter: text("delimiter"),
        }
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|value| Self::from_value(&value))
    }
}

/// The `input` section of a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Input {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub assets: Vec<Asset>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Asset>, D::Error> {
    Option::<Vec<Asset>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A decoded inference/training request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: String,
    pub application: String,
    pub consumer: String,
    pub country: String,
    pub client: String,
    pub characteristics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Input>,
    /// The payload exactly as received.
    #[serde(skip)]
    raw: Value,
}

impl Request {
    /// Decodes a request from its JSON payload.
    ///
    /// # Errors
    ///
    /// - `RequestError::Empty` for `null` or `{}`
    /// - `RequestError::NotAnObject` for any other non-object payload
    /// - `RequestError::MissingFields` naming every absent required key
    /// - `RequestError::Malformed` when a field has the wrong type
    /// - `RequestError::InvalidField` for a blank `requestId` or no characteristics
    pub fn from_value(payload: &Value) -> Result<Self, RequestError> {
        let object = match payload {
            Value::Null => return Err(RequestError::Empty),
            Value::Object(map) if map.is_empty() => return Err(RequestError::Empty),
            Value::Object(map) => map,
            _ => return Err(RequestError::NotAnObject),
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| object.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(RequestError::MissingFields(missing.join(", ")));
        }

        let mut request: Request = serde_json::from_value(payload.clone())?;

        if request.request_id.trim().is_empty() {
            return Err(RequestError::InvalidField {
                field: "requestId".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
        if request.characteristics.is_empty() {
            return Err(RequestError::InvalidField {
                field: "characteristics".to_string(),
                reason: "must contain at least one entry".to_string(),
            });
        }

        request.raw = payload.clone();
        Ok(request)
    }

    /// The payload exactly as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Input assets, empty when the request has no `input` section.
    pub fn assets(&self) -> &[Asset] {
        self.input
            .as_ref()
            .map(|input| input.assets.as_slice())
            .unwrap_or_default()
    }

    /// First characteristic, the one used in cache keys.
    pub fn primary_characteristic(&self) -> &str {
        self.characteristics.first().map_or("", String::as_str)
    }

    /// Prefix of the metadata keys: `application_consumer_country_characteristic`.
    pub fn metadata_key_prefix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.application,
            self.consumer,
            self.country,
            self.primary_characteristic()
        )
        .to_lowercase()
    }

    /// Metadata key for one suffix, e.g. `app_consumer_us_char_model`.
    pub fn metadata_key(&self, suffix: &str) -> String {
        format!("{}_{}", self.metadata_key_prefix(), suffix.to_lowercase())
    }

    /// Key of the cached request entry:
    /// `application_consumer_characteristic_requestId_country`.
    pub fn request_cache_key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.application,
            self.consumer,
            self.primary_characteristic(),
            self.request_id,
            self.country
        )
        .to_lowercase()
    }
}

/// Per-delivery context supplied by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    /// Identifier of this delivery, for log correlation.
    pub delivery_id: String,
    /// When the dispatcher received the request.
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(delivery_id: impl Into<String>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            received_at: Utc::now(),
        }
    }
}
