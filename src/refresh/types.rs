use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::types::{ApiType, RawActivityRecord};
use crate::catalog::ApiDescriptor;

/// Outcome for one responsibility in one pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub responsibility: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
}

impl RefreshResult {
    pub fn succeeded(responsibility: impl Into<String>) -> Self {
        Self { responsibility: responsibility.into(), success: true, error: None, offline: false }
    }

    pub fn failed(responsibility: impl Into<String>, error: impl Into<String>) -> Self {
        Self { responsibility: responsibility.into(), success: false, error: Some(error.into()), offline: false }
    }

    /// Soft result: not attempted because the device is offline.
    pub fn offline(responsibility: impl Into<String>) -> Self {
        Self { responsibility: responsibility.into(), success: false, error: None, offline: true }
    }

    pub fn is_hard_failure(&self) -> bool { !self.success && !self.offline }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub offline: usize,
    pub total: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RefreshSummary {
    pub fn from_results(results: &[RefreshResult], cancelled: bool, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            succeeded: results.iter().filter(|r| r.success).count(),
            failed: results.iter().filter(|r| r.is_hard_failure()).count(),
            offline: results.iter().filter(|r| r.offline).count(),
            total: results.len(),
            cancelled,
            started_at,
            completed_at,
        }
    }
}

/// Position of an in-flight pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub current_api: String,
    pub current_api_type: ApiType,
    /// Milliseconds; `None` until one responsibility has finished.
    pub estimated_time_remaining: Option<u64>,
}

impl RefreshProgress {
    pub fn at(current: usize, total: usize, api: &ApiDescriptor, eta_ms: Option<u64>) -> Self {
        Self {
            current,
            total,
            percentage: percentage(current, total),
            current_api: api.api_name.clone(),
            current_api_type: api.api_type,
            estimated_time_remaining: eta_ms,
        }
    }
}

pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 { return 0; }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Activity records owned by one responsibility; the first record tracks the
/// responsibility's own call, the rest come from its fetch delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityLane {
    pub responsibility: String,
    pub records: Vec<RawActivityRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Everything a finished (or cancelled) pass hands back.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub pass_id: String,
    pub state: RunState,
    pub summary: RefreshSummary,
    pub results: Vec<RefreshResult>,
    pub activities: Vec<RawActivityRecord>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh needs at least one responsibility")]
    EmptyResponsibilities,
    #[error("a refresh pass is already running")]
    AlreadyRunning,
    #[error("no failed responsibilities to retry")]
    NothingToRetry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_and_clamps() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(5, 3), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn summary_separates_offline_from_failures() {
        let now = Utc::now();
        let results = vec![
            RefreshResult::succeeded("A"),
            RefreshResult::failed("B", "500"),
            RefreshResult::offline("C"),
        ];
        let s = RefreshSummary::from_results(&results, false, now, now);
        assert_eq!((s.succeeded, s.failed, s.offline, s.total), (1, 1, 1, 3));
    }

    #[test]
    fn offline_flag_is_omitted_when_false() {
        let v = serde_json::to_value(RefreshResult::succeeded("A")).unwrap();
        assert!(v.get("offline").is_none());
        assert!(v.get("error").is_none());
        let v = serde_json::to_value(RefreshResult::offline("B")).unwrap();
        assert_eq!(v["offline"], true);
    }
}
