use super::types::{ActivityStatus, ApiType, RawActivityRecord};

/// Decides whether a non-error record is a partial result worth expanding.
pub trait ExpandPolicy: Send + Sync {
    fn is_partial(&self, record: &RawActivityRecord) -> bool;
}

impl<F> ExpandPolicy for F
where
    F: Fn(&RawActivityRecord) -> bool + Send + Sync,
{
    fn is_partial(&self, record: &RawActivityRecord) -> bool { self(record) }
}

/// Default rule: a finished call that inserted something, but at least
/// `min_missing` fewer rows than it was asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortfallPolicy {
    pub min_missing: i64,
}

impl Default for ShortfallPolicy {
    fn default() -> Self { Self { min_missing: 1 } }
}

impl ExpandPolicy for ShortfallPolicy {
    fn is_partial(&self, record: &RawActivityRecord) -> bool {
        if record.status != ActivityStatus::Success || is_count_corrected(record) {
            return false;
        }
        let inserted = record.inserted_records;
        let total = record.total_records;
        inserted > 0 && total - inserted >= self.min_missing.max(1)
    }
}

/// Inserted counts that the feed over-reports and that should replace the total.
pub fn is_count_corrected(record: &RawActivityRecord) -> bool {
    let inserted = record.inserted_records;
    let total = record.total_records;
    (record.api_type == ApiType::Config && inserted > total) || inserted > total.saturating_mul(2)
}

/// Record count to display for one attempt.
pub fn corrected_count(record: &RawActivityRecord) -> i64 {
    if is_count_corrected(record) {
        record.inserted_records.max(0)
    } else {
        record.total_records.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn done(api_type: ApiType, total: i64, inserted: i64) -> RawActivityRecord {
        let mut r = RawActivityRecord::pending("x", api_type, "/x");
        r.succeed(Utc::now(), total, inserted);
        r
    }

    #[test]
    fn config_feed_overcount_is_corrected() {
        assert_eq!(corrected_count(&done(ApiType::Config, 5, 50)), 50);
        assert_eq!(corrected_count(&done(ApiType::Config, 5, 6)), 6);
    }

    #[test]
    fn large_overcount_is_corrected_for_any_type() {
        assert_eq!(corrected_count(&done(ApiType::Transactional, 10, 21)), 21);
        assert_eq!(corrected_count(&done(ApiType::Transactional, 10, 20)), 10);
    }

    #[test]
    fn undercount_keeps_requested_total() {
        assert_eq!(corrected_count(&done(ApiType::Transactional, 100, 10)), 100);
        assert_eq!(corrected_count(&done(ApiType::Master, -3, 0)), 0);
    }

    #[test]
    fn shortfall_policy_flags_only_genuine_partials() {
        let p = ShortfallPolicy::default();
        assert!(p.is_partial(&done(ApiType::Transactional, 100, 10)));
        assert!(!p.is_partial(&done(ApiType::Transactional, 100, 100)));
        assert!(!p.is_partial(&done(ApiType::Transactional, 100, 0)));
        assert!(!p.is_partial(&done(ApiType::Config, 5, 50)));

        let strict = ShortfallPolicy { min_missing: 50 };
        assert!(!strict.is_partial(&done(ApiType::Master, 100, 60)));
        assert!(strict.is_partial(&done(ApiType::Master, 100, 40)));
    }

    #[test]
    fn closures_act_as_policies() {
        let never = |_: &RawActivityRecord| false;
        assert!(!never.is_partial(&done(ApiType::Transactional, 100, 10)));
    }
}
