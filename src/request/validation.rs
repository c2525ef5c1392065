//! Asset path checks.
//!
//! A path has to name something before it is worth asking storage about it.
//! Blank strings, `.` and an empty quoted string (`""` or `''`) are rejected
//! without touching storage.

use anyhow::Result;

use super::Asset;

/// An asset that could not be confirmed, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetIssue {
    pub name: String,
    pub path: String,
    pub reason: String,
}

impl AssetIssue {
    pub fn new(asset: &Asset, reason: impl Into<String>) -> Self {
        Self {
            name: asset.name.clone(),
            path: asset.path.clone().unwrap_or_default(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for AssetIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.name.is_empty() {
            "unnamed asset"
        } else {
            self.name.as_str()
        };
        write!(f, "{} at '{}' ({})", name, self.path, self.reason)
    }
}

/// Returns the asset's path if it is usable for a storage lookup.
pub fn usable_asset_path(asset: &Asset) -> Result<&str> {
    let path = asset
        .path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("path is missing or not a string"))?;
    check_asset_path(path)?;
    Ok(path)
}

/// Validate that an asset path can refer to a file.
pub fn check_asset_path(path: &str) -> Result<()> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        anyhow::bail!("path is blank");
    }
    if trimmed == "." {
        anyhow::bail!("path '.' does not name a file");
    }
    if trimmed == "\"\"" || trimmed == "''" {
        anyhow::bail!("path is an empty quoted string");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_path_valid() {
        assert!(check_asset_path("dummy/path/to/test.csv").is_ok());
        assert!(check_asset_path("file.csv").is_ok());
        assert!(check_asset_path("./data/file.csv").is_ok());
        assert!(check_asset_path("\"quoted.csv\"").is_ok());
    }

    #[test]
    fn asset_path_blank() {
        assert!(check_asset_path("").is_err());
        assert!(check_asset_path(" ").is_err());
        assert!(check_asset_path("  ").is_err());
        assert!(check_asset_path("\t\n").is_err());
    }

    #[test]
    fn asset_path_dot() {
        assert!(check_asset_path(".").is_err());
        assert!(check_asset_path(" . ").is_err());
    }

    #[test]
    fn asset_path_empty_quotes() {
        assert!(check_asset_path("\"\"").is_err());
        assert!(check_asset_path("''").is_err());
    }

    #[test]
    fn asset_without_string_path() {
        let asset = Asset::from_value(&serde_json::json!({"name": "test.csv", "path": 7}));
        let err = usable_asset_path(&asset).unwrap_err();
        assert_eq!(err.to_string(), "path is missing or not a string");

        let issue = AssetIssue::new(&Asset::from_value(&serde_json::json!({})), err.to_string());
        assert_eq!(
            issue.to_string(),
            "unnamed asset at '' (path is missing or not a string)"
        );
    }

    #[test]
    fn asset_with_usable_path() {
        let asset = Asset::new("test.csv", "data/test.csv");
        assert_eq!(usable_asset_path(&asset).expect("usable"), "data/test.csv");
        assert!(usable_asset_path(&Asset::new("dot.csv", ".")).is_err());
    }

    #[test]
    fn asset_issue_display() {
        let asset = Asset::new("test.csv", "missing/test.csv");
        let issue = AssetIssue::new(&asset, "Not found");
        assert_eq!(issue.to_string(), "test.csv at 'missing/test.csv' (Not found)");
    }
}
