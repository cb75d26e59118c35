use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::activity::types::{parse_wire_records, RawActivityRecord};
use crate::catalog::ApiDescriptor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No route to the backend; soft, the pass degrades to offline.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            FetchError::NetworkUnavailable(err.to_string())
        } else {
            FetchError::RemoteCallFailed(err.to_string())
        }
    }
}

/// Pulls one responsibility's data and reports what it wrote as activity records.
#[async_trait]
pub trait ResponsibilityFetcher: Send + Sync {
    async fn fetch(&self, api: &ApiDescriptor) -> Result<Vec<RawActivityRecord>, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    base_url: Url,
    org_id: String,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(http: Client, base_url: Url, org_id: impl Into<String>, token: Option<String>) -> Self {
        Self { http, base_url, org_id: org_id.into(), token }
    }

    fn endpoint(&self, api: &ApiDescriptor) -> Result<Url, FetchError> {
        self.base_url
            .join(api.path.trim_start_matches('/'))
            .map_err(|e| FetchError::RemoteCallFailed(format!("bad path '{}': {e}", api.path)))
    }
}

#[async_trait]
impl ResponsibilityFetcher for HttpFetcher {
    async fn fetch(&self, api: &ApiDescriptor) -> Result<Vec<RawActivityRecord>, FetchError> {
        let url = self.endpoint(api)?;
        let mut req = self.http.get(url.clone()).query(&[("orgId", self.org_id.as_str())]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(FetchError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(FetchError::RemoteCallFailed(format!("{status}: {snippet}")));
        }
        let payload: Value = resp.json().await.map_err(|e| FetchError::RemoteCallFailed(format!("decode: {e}")))?;
        Ok(records_from_payload(api, url.as_str(), &self.org_id, &payload))
    }
}

/// Either the backend's own `activities` list, or one success record summarising the body.
pub fn records_from_payload(api: &ApiDescriptor, url: &str, org_id: &str, payload: &Value) -> Vec<RawActivityRecord> {
    if let Some(list) = payload.get("activities") {
        return parse_wire_records(list);
    }

    let rows = payload
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array())
        .map(|a| a.len() as i64);
    let total = payload.get("totalRecords").and_then(Value::as_i64).or(rows).unwrap_or(0);
    let inserted = payload.get("insertedRecords").and_then(Value::as_i64).unwrap_or(total);

    let now = Utc::now();
    let mut rec = RawActivityRecord::pending(&api.api_name, api.api_type, url);
    rec.org_id = org_id.to_string();
    rec.start(now);
    rec.succeed(now, total, inserted);
    vec![rec]
}
