use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Org id carried by a record whose org has not been resolved yet.
pub const PENDING_ORG: &str = "pending";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    Master,
    Config,
    Transactional,
    Unknown,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Master => "master",
            ApiType::Config => "config",
            ApiType::Transactional => "transactional",
            ApiType::Unknown => "unknown",
        }
    }

    /// Lenient parse: anything unrecognised is `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => ApiType::Master,
            "config" => ApiType::Config,
            "transactional" => ApiType::Transactional,
            _ => ApiType::Unknown,
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pending,
    Processing,
    Success,
    Error,
    Failure,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::Processing => "processing",
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::Failure => "failure",
        }
    }

    /// `completed_at` is set iff the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityStatus::Success | ActivityStatus::Error | ActivityStatus::Failure)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActivityStatus::Error | ActivityStatus::Failure)
    }

    /// Rank used when several attempts of one API are folded together.
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            ActivityStatus::Processing => 3,
            ActivityStatus::Error | ActivityStatus::Failure => 2,
            ActivityStatus::Success => 1,
            ActivityStatus::Pending => 0,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ActivityStatus {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ActivityStatus::Pending),
            "processing" => Ok(ActivityStatus::Processing),
            "success" => Ok(ActivityStatus::Success),
            "error" => Ok(ActivityStatus::Error),
            "failure" => Ok(ActivityStatus::Failure),
            "" => Err(ActivityError::Malformed("empty status".into())),
            other => Err(ActivityError::Malformed(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityError {
    #[error("malformed activity record: {0}")]
    Malformed(String),
}

/// One attempt to call one backend endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivityRecord {
    pub api_name: String,
    pub api_type: ApiType,
    pub status: ActivityStatus,
    pub org_id: String,
    pub url: String,
    pub total_records: i64,
    pub inserted_records: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RawActivityRecord {
    pub fn pending(api_name: impl Into<String>, api_type: ApiType, url: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            api_type,
            status: ActivityStatus::Pending,
            org_id: PENDING_ORG.to_string(),
            url: url.into(),
            total_records: 0,
            inserted_records: 0,
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey { api_name: self.api_name.clone(), api_type: self.api_type }
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = ActivityStatus::Processing;
        self.error = None;
        self.started_at = Some(at);
        self.completed_at = None;
    }

    pub fn succeed(&mut self, at: DateTime<Utc>, total: i64, inserted: i64) {
        self.status = ActivityStatus::Success;
        self.total_records = total;
        self.inserted_records = inserted;
        self.error = None;
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.status = ActivityStatus::Error;
        self.error = Some(message.into());
        self.completed_at = Some(at);
    }

    /// Back to `pending` without a completion time (call never attempted).
    pub fn reset(&mut self) {
        self.status = ActivityStatus::Pending;
        self.completed_at = None;
    }
}

/// Grouping key of the consolidation pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub api_name: String,
    pub api_type: ApiType,
}

impl GroupKey {
    pub fn id(&self) -> String { format!("{}::{}", self.api_name, self.api_type) }
}

/// Lenient inbound shape: every field optional, camelCase names.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireActivityRecord {
    pub api_name: Option<String>,
    pub api_type: Option<String>,
    pub status: Option<String>,
    pub org_id: Option<String>,
    pub url: Option<String>,
    pub total_records: Option<i64>,
    pub inserted_records: Option<i64>,
    pub error: Option<String>,
    pub retry_count: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireActivityRecord> for RawActivityRecord {
    type Error = ActivityError;

    fn try_from(w: WireActivityRecord) -> Result<Self, Self::Error> {
        let api_name = w.api_name.map(|s| s.trim().to_string()).unwrap_or_default();
        if api_name.is_empty() {
            return Err(ActivityError::Malformed("missing apiName".into()));
        }
        let status: ActivityStatus = match w.status.as_deref() {
            Some(s) => s.parse()?,
            None => return Err(ActivityError::Malformed(format!("missing status for '{api_name}'"))),
        };

        // keep the completed_at invariant even when the sender did not
        let completed_at = if status.is_terminal() {
            w.completed_at.or(w.started_at).or_else(|| Some(Utc::now()))
        } else {
            None
        };

        Ok(RawActivityRecord {
            api_name,
            api_type: w.api_type.as_deref().map(ApiType::parse_lenient).unwrap_or(ApiType::Unknown),
            status,
            org_id: w.org_id.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| PENDING_ORG.to_string()),
            url: w.url.unwrap_or_default(),
            total_records: w.total_records.unwrap_or(0),
            inserted_records: w.inserted_records.unwrap_or(0),
            error: w.error,
            retry_count: w.retry_count.unwrap_or(0),
            started_at: w.started_at,
            completed_at,
        })
    }
}

/// Parse a JSON array of wire records, dropping malformed entries.
pub fn parse_wire_records(value: &serde_json::Value) -> Vec<RawActivityRecord> {
    let Some(items) = value.as_array() else {
        tracing::warn!("activity payload is not an array; ignoring");
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let wire: WireActivityRecord = match serde_json::from_value(item.clone()) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "dropping undecodable activity record");
                    return None;
                }
            };
            match RawActivityRecord::try_from(wire) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "dropping activity record");
                    None
                }
            }
        })
        .collect()
}
