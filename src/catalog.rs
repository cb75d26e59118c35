use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::types::ApiType;

/// Name of a logical remote data domain refreshed or synced as a unit.
pub type Responsibility = String;

/// How one responsibility maps onto the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    pub responsibility: Responsibility,
    pub api_name: String,
    #[serde(default = "unknown_api_type")]
    pub api_type: ApiType,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_path: Option<String>,
}

fn unknown_api_type() -> ApiType { ApiType::Unknown }

impl ApiDescriptor {
    /// Descriptor used for responsibilities the catalog does not know.
    pub fn fallback(responsibility: &str) -> Self {
        Self {
            responsibility: responsibility.to_string(),
            api_name: responsibility.to_string(),
            api_type: ApiType::Unknown,
            path: responsibility.to_string(),
            confirm_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("read catalog {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog entry with blank responsibility")]
    Blank,
    #[error("responsibility '{0}' listed twice")]
    Duplicate(String),
}

#[derive(Deserialize)]
struct CatalogFile {
    responsibilities: Vec<ApiDescriptor>,
}

/// Ordered set of known responsibilities.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: Vec<ApiDescriptor>,
}

impl Catalog {
    pub fn new(entries: Vec<ApiDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for e in &entries {
            if e.responsibility.trim().is_empty() { return Err(CatalogError::Blank); }
            if !seen.insert(e.responsibility.clone()) {
                return Err(CatalogError::Duplicate(e.responsibility.clone()));
            }
        }
        Ok(Self { entries })
    }

    pub fn from_json(s: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(s)?;
        Self::new(file.responsibilities)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| CatalogError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&raw)
    }

    /// Missing file means an empty catalog; a present but broken file is an error.
    pub fn load_or_empty(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no catalog file; starting empty");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn get(&self, responsibility: &str) -> Option<&ApiDescriptor> {
        self.entries.iter().find(|e| e.responsibility == responsibility)
    }

    pub fn descriptor(&self, responsibility: &str) -> ApiDescriptor {
        self.get(responsibility).cloned().unwrap_or_else(|| ApiDescriptor::fallback(responsibility))
    }

    pub fn responsibilities(&self) -> Vec<Responsibility> {
        self.entries.iter().map(|e| e.responsibility.clone()).collect()
    }

    /// Entries that have a remote-confirm endpoint.
    pub fn confirmable(&self) -> impl Iterator<Item = &ApiDescriptor> {
        self.entries.iter().filter(|e| e.confirm_path.is_some())
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "responsibilities": [
            {"responsibility": "ITEMS", "apiName": "items", "apiType": "master", "path": "api/items"},
            {"responsibility": "ORG_PARAMS", "apiName": "org_params", "apiType": "config", "path": "api/org-params"},
            {"responsibility": "SHIP_CONFIRM", "apiName": "ship_confirm", "apiType": "transactional",
             "path": "api/deliveries", "confirmPath": "api/ship-confirm"}
        ]
    }"#;

    #[test]
    fn parses_entries_in_file_order() {
        let cat = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(cat.responsibilities(), vec!["ITEMS", "ORG_PARAMS", "SHIP_CONFIRM"]);
        assert_eq!(cat.get("ORG_PARAMS").unwrap().api_type, ApiType::Config);
        let confirmable: Vec<_> = cat.confirmable().map(|d| d.responsibility.as_str()).collect();
        assert_eq!(confirmable, vec!["SHIP_CONFIRM"]);
    }

    #[test]
    fn unknown_responsibility_falls_back() {
        let cat = Catalog::from_json(SAMPLE).unwrap();
        let d = cat.descriptor("LPN_LOOKUP");
        assert_eq!(d.api_name, "LPN_LOOKUP");
        assert_eq!(d.api_type, ApiType::Unknown);
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        let dup = r#"{"responsibilities": [
            {"responsibility": "A", "apiName": "a", "path": "a"},
            {"responsibility": "A", "apiName": "a2", "path": "a2"}
        ]}"#;
        assert!(matches!(Catalog::from_json(dup), Err(CatalogError::Duplicate(r)) if r == "A"));
        let blank = r#"{"responsibilities": [{"responsibility": " ", "apiName": "a", "path": "a"}]}"#;
        assert!(matches!(Catalog::from_json(blank), Err(CatalogError::Blank)));
    }

    #[test]
    fn load_or_empty_handles_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Catalog::load_or_empty(&missing).unwrap().is_empty());

        let path = dir.path().join("catalog.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        assert_eq!(Catalog::load_or_empty(&path).unwrap().responsibilities().len(), 3);
    }
}
