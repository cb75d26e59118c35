use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::{corrected_count, ExpandPolicy, ShortfallPolicy};
use super::types::{ActivityStatus, ApiType, GroupKey, RawActivityRecord};

/// Display-level aggregate of every attempt against one API.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedApiRecord {
    pub id: String,
    pub api_name: String,
    #[serde(rename = "type")]
    pub api_type: ApiType,
    pub status: ActivityStatus,
    pub activities: Vec<RawActivityRecord>,
    pub inserted_records: i64,
    pub can_expand: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_retry_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

/// Pure reducer from raw activity records to grouped display records.
///
/// Holds no state between passes; the keyed index is rebuilt on every call so
/// re-running it on a partially updated list is always safe.
#[derive(Clone)]
pub struct ConsolidationEngine {
    policy: Arc<dyn ExpandPolicy>,
}

impl Default for ConsolidationEngine {
    fn default() -> Self { Self::new(Arc::new(ShortfallPolicy::default())) }
}

impl ConsolidationEngine {
    pub fn new(policy: Arc<dyn ExpandPolicy>) -> Self { Self { policy } }

    pub fn consolidate(&self, records: &[RawActivityRecord]) -> Vec<ConsolidatedApiRecord> {
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<(GroupKey, Vec<&RawActivityRecord>)> = Vec::new();

        for (pos, record) in records.iter().enumerate() {
            if record.api_name.trim().is_empty() {
                tracing::warn!(position = pos, url = %record.url, "skipping activity record without apiName");
                continue;
            }
            let key = record.key();
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(record),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![record]));
                }
            }
        }

        groups.into_iter().map(|(key, members)| self.fold(key, &members)).collect()
    }

    fn fold(&self, key: GroupKey, members: &[&RawActivityRecord]) -> ConsolidatedApiRecord {
        // later attempts win ties between equally ranked statuses
        let mut status = ActivityStatus::Pending;
        for m in members {
            if m.status.precedence() >= status.precedence() {
                status = m.status;
            }
        }

        let reference = members
            .iter()
            .rev()
            .find(|m| m.status.is_terminal())
            .or_else(|| members.last())
            .copied();
        let inserted_records = reference.map(corrected_count).unwrap_or(0);

        let can_expand = members
            .iter()
            .any(|m| m.status.is_error() || self.policy.is_partial(m));

        let last_sync_time = members
            .iter()
            .filter(|m| m.status == ActivityStatus::Success)
            .filter_map(|m| m.completed_at)
            .max();
        let last_retry_time = members
            .iter()
            .filter(|m| m.retry_count > 0)
            .filter_map(|m| m.started_at)
            .max();
        let retry_count = members.iter().map(|m| m.retry_count).max().unwrap_or(0);

        ConsolidatedApiRecord {
            id: key.id(),
            api_name: key.api_name,
            api_type: key.api_type,
            status,
            activities: members.iter().map(|m| (*m).clone()).collect(),
            inserted_records,
            can_expand,
            last_sync_time,
            last_retry_time,
            retry_count,
        }
    }
}

/// Consolidate with the default expand rule.
pub fn consolidate(records: &[RawActivityRecord]) -> Vec<ConsolidatedApiRecord> {
    ConsolidationEngine::default().consolidate(records)
}

/// Flatten grouped records back into their constituent activities.
pub fn flatten(groups: &[ConsolidatedApiRecord]) -> Vec<RawActivityRecord> {
    groups.iter().flat_map(|g| g.activities.iter().cloned()).collect()
}
