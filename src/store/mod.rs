use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::refresh::types::{ActivityLane, RefreshResult};

pub mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Failed,
    Confirmed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Failed => "failed",
            PendingStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "failed" => Ok(PendingStatus::Failed),
            "confirmed" => Ok(PendingStatus::Confirmed),
            other => Err(StoreError::Decode(format!("unknown pending status '{other}'"))),
        }
    }
}

/// A locally captured transaction awaiting remote confirmation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: String,
    pub responsibility: String,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub status: PendingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read-only view of the offline queue used by the sync coordinator.
#[async_trait]
pub trait PendingTransactionStore: Send + Sync {
    /// Everything not yet confirmed (pending or previously failed), oldest first.
    async fn list_pending(&self) -> Result<Vec<PendingTransaction>, StoreError>;
}

/// One journaled refresh pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub cancelled: bool,
    pub results: Vec<RefreshResult>,
    pub lanes: Vec<ActivityLane>,
}
