//! In-process key/value store.
//!
//! Used for local runs without Redis and as a test double. Pattern matching
//! follows Redis `KEYS` glob semantics.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use regex::Regex;

use super::KeyValueStore;
use crate::error::CacheError;

/// Key/value store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_matched_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let regex = glob_to_regex(pattern)?;
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;
        Ok(entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;
        Ok(entries.clone())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;
        entries.clear();
        Ok(())
    }
}

/// Translates a Redis glob pattern into an anchored regular expression.
///
/// Supports `*`, `?`, character classes (`[abc]`, `[^a]`, `[a-z]`) and
/// backslash escapes.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || (inner == '[' && !class.ends_with('\\')) {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if !closed {
                    return Err(CacheError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: "unterminated character class".to_string(),
                    });
                }
                class.push(']');
                regex.push_str(&class);
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    regex.push('$');
    Regex::new(&regex).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_flush() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set_value("app_any_us_char_model", "{}").await.expect("set");
        assert_eq!(
            store.get_value("app_any_us_char_model").await.expect("get"),
            Some("{}".to_string())
        );
        assert_eq!(store.get_value("missing").await.expect("get"), None);
        assert_eq!(store.len(), 1);

        store.flush_all().await.expect("flush");
        assert!(store.get_all().await.expect("all").is_empty());
    }

    #[tokio::test]
    async fn test_matched_keys() {
        let store = MemoryStore::with_entries([
            ("app_consumer_us_char_model", "1"),
            ("app_consumer_us_char_service", "2"),
            ("app_consumer_us_char_property", "3"),
            ("other_key", "4"),
        ]);

        let mut keys = store
            .get_matched_keys("app_consumer_us_char_*")
            .await
            .expect("keys");
        keys.sort();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], "app_consumer_us_char_model");

        assert_eq!(store.get_matched_keys("*").await.expect("keys").len(), 4);
        assert_eq!(
            store.get_matched_keys("other_ke?").await.expect("keys"),
            vec!["other_key".to_string()]
        );
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("h?llo").expect("pattern");
        assert!(re.is_match("hello"));
        assert!(!re.is_match("heello"));

        let re = glob_to_regex("h[ae]llo").expect("pattern");
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hillo"));

        let re = glob_to_regex("h[^e]llo").expect("pattern");
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hello"));

        let re = glob_to_regex("a.b+c").expect("pattern");
        assert!(re.is_match("a.b+c"));
        assert!(!re.is_match("axb+c"));

        let re = glob_to_regex("star\\*").expect("pattern");
        assert!(re.is_match("star*"));
        assert!(!re.is_match("starry"));
    }

    #[test]
    fn test_glob_unterminated_class() {
        assert!(matches!(
            glob_to_regex("key[abc"),
            Err(CacheError::InvalidPattern { .. })
        ));
    }
}
