//! Key/value stores for request metadata and cached requests.
//!
//! Two stores back the worker:
//!
//! - the **metadata** store, holding per-consumer entries keyed by
//!   `application_consumer_country_characteristic_{model|service|property}`
//! - the **caching** store, holding request payloads keyed by
//!   `application_consumer_characteristic_requestId_country`
//!
//! Keys are always lower-cased (see [`crate::request::Request`]). Both stores
//! are used through [`KeyValueStore`], implemented by [`RedisStore`] and by
//! the in-process [`MemoryStore`].

mod memory;
mod redis_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CacheError;

pub use memory::{glob_to_regex, MemoryStore};
pub use redis_store::RedisStore;

/// Narrow key/value interface over the cache backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored at `key`, if any.
    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` at `key`, replacing any previous value.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Returns the keys matching a Redis-style glob pattern (`*`, `?`, `[...]`).
    async fn get_matched_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Returns every entry in the store.
    async fn get_all(&self) -> Result<BTreeMap<String, String>, CacheError>;

    /// Removes every entry in the store.
    async fn flush_all(&self) -> Result<(), CacheError>;
}

/// Escapes glob metacharacters so `text` matches literally in a pattern.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Connects to Redis when a URL is given, otherwise uses an in-process store.
pub async fn connect(url: Option<&str>) -> Result<Arc<dyn KeyValueStore>, CacheError> {
    match url {
        Some(url) => Ok(Arc::new(RedisStore::connect(url).await?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("app_any_us_char"), "app_any_us_char");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");

        let pattern = format!("{}_*", escape_glob("odd[key]"));
        let regex = glob_to_regex(&pattern).expect("pattern");
        assert!(regex.is_match("odd[key]_model"));
        assert!(!regex.is_match("oddk_model"));
    }

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        let store = connect(None).await.expect("store");
        store.set_value("k", "v").await.expect("set");
        assert_eq!(store.get_value("k").await.expect("get"), Some("v".to_string()));
    }
}
