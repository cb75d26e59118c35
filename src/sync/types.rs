use serde::Serialize;
use thiserror::Error;

use super::notify::Notification;
use crate::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncClassification {
    Success,
    Partial,
    Failure,
    Offline,
}

/// What happened to one responsibility during a sync pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsibilitySync {
    pub responsibility: String,
    pub success: bool,
    pub confirmed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
}

impl ResponsibilitySync {
    pub fn synced(responsibility: &str, confirmed: usize) -> Self {
        Self { responsibility: responsibility.to_string(), success: true, confirmed, error: None, offline: false }
    }

    pub fn failed(responsibility: &str, error: impl Into<String>) -> Self {
        Self { responsibility: responsibility.to_string(), success: false, confirmed: 0, error: Some(error.into()), offline: false }
    }

    pub fn offline(responsibility: &str) -> Self {
        Self { responsibility: responsibility.to_string(), success: false, confirmed: 0, error: None, offline: true }
    }

    pub fn is_error(&self) -> bool { !self.success && !self.offline }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub classification: SyncClassification,
    pub synced: usize,
    pub errored: usize,
    pub deferred: usize,
    pub outcomes: Vec<ResponsibilitySync>,
    pub pending_before: usize,
    pub pending_after: usize,
    pub notification: Notification,
}

/// Hard errors are never masked by an offline tail. Offline only when nothing got through.
pub fn classify(outcomes: &[ResponsibilitySync]) -> SyncClassification {
    let synced = outcomes.iter().filter(|o| o.success).count();
    let errored = outcomes.iter().filter(|o| o.is_error()).count();
    let deferred = outcomes.iter().filter(|o| o.offline).count();
    match (synced, errored, deferred) {
        (0, 0, d) if d > 0 => SyncClassification::Offline,
        (_, 0, 0) => SyncClassification::Success,
        (0, _, _) => SyncClassification::Failure,
        _ => SyncClassification::Partial,
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync pass is already running")]
    AlreadySyncing,
    #[error("sync needs at least one responsibility")]
    EmptyResponsibilities,
    #[error(transparent)]
    Store(#[from] StoreError),
}
