use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use url::Url;

use crate::activity::types::PENDING_ORG;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;

/// Runtime settings read from the environment (`.env` is loaded by `main`).
#[derive(Clone, Debug)]
pub struct Settings {
    pub api_base_url: Option<Url>,
    pub api_token: Option<String>,
    pub org_id: String,
    pub http_timeout: Duration,
    pub probe_url: Option<Url>,
    pub probe_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            org_id: PENDING_ORG.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_url: None,
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(base) = get("DOCK_API_BASE_URL").filter(|s| !s.trim().is_empty()) {
            cfg.api_base_url = Some(parse_base(&base).context("DOCK_API_BASE_URL")?);
        }
        cfg.api_token = get("DOCK_API_TOKEN").filter(|s| !s.trim().is_empty());
        if let Some(org) = get("DOCK_ORG_ID").filter(|s| !s.trim().is_empty()) {
            cfg.org_id = org;
        }
        if let Some(secs) = get("DOCK_HTTP_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = get("DOCK_PROBE_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.probe_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(probe) = get("DOCK_PROBE_URL").filter(|s| !s.trim().is_empty()) {
            cfg.probe_url = Some(Url::parse(&probe).context("DOCK_PROBE_URL")?);
        }
        Ok(cfg)
    }

    pub fn base_url(&self) -> Result<&Url> {
        self.api_base_url
            .as_ref()
            .context("DOCK_API_BASE_URL is not set")
    }

    /// Explicit probe URL, else `{base}/health`.
    pub fn resolved_probe_url(&self) -> Result<Url> {
        if let Some(u) = &self.probe_url { return Ok(u.clone()); }
        self.base_url()?.join("health").context("build probe url")
    }

    pub fn http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("build http client")
    }
}

// Url::join drops the last segment unless the base ends with '/'.
fn parse_base(s: &str) -> Result<Url> {
    let trimmed = s.trim();
    let with_slash = if trimmed.ends_with('/') { trimmed.to_string() } else { format!("{trimmed}/") };
    Ok(Url::parse(&with_slash)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = Settings::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.api_base_url.is_none());
        assert_eq!(cfg.org_id, "pending");
        assert_eq!(cfg.http_timeout, Duration::from_secs(20));
        assert!(cfg.base_url().is_err());
    }

    #[test]
    fn reads_overrides_and_normalises_base() {
        let cfg = Settings::from_lookup(lookup(&[
            ("DOCK_API_BASE_URL", "https://wms.example.com/mobile"),
            ("DOCK_ORG_ID", "204"),
            ("DOCK_HTTP_TIMEOUT_SECS", "5"),
            ("DOCK_PROBE_INTERVAL_SECS", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(cfg.org_id, "204");
        assert_eq!(cfg.http_timeout, Duration::from_secs(5));
        assert_eq!(cfg.probe_interval, Duration::from_secs(10));
        let base = cfg.base_url().unwrap();
        assert_eq!(base.join("api/items").unwrap().as_str(), "https://wms.example.com/mobile/api/items");
        assert_eq!(cfg.resolved_probe_url().unwrap().as_str(), "https://wms.example.com/mobile/health");
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        assert!(Settings::from_lookup(lookup(&[("DOCK_API_BASE_URL", "not a url")])).is_err());
    }
}
