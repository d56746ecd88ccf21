//! Usage Aggregation for the Current Billing Cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::{AssessmentKind, UsageRecord};
use crate::plans::{plan_for, AssessmentQuota, PlanTier};

/// Per-cycle usage roll-up for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageSummary {
    pub screening: u32,
    pub full: u32,
    pub total_tokens: u64,
    pub assessments_used: u32,
    /// `-1` when unlimited
    #[schema(value_type = i64)]
    pub assessment_limit: AssessmentQuota,
    /// Rounded share of the quota consumed; `0` for unlimited plans
    pub percentage: u32,
}

/// Fold usage records of one cycle into a summary
pub fn summarize<'a, I>(records: I, tier: PlanTier, used: u32) -> UsageSummary
where
    I: IntoIterator<Item = &'a UsageRecord>,
{
    let mut screening = 0u32;
    let mut full = 0u32;
    let mut total_tokens = 0u64;

    for record in records {
        match record.kind {
            AssessmentKind::Screening => screening += 1,
            AssessmentKind::Full => full += 1,
        }
        total_tokens = total_tokens.saturating_add(record.tokens_used);
    }

    let limit = plan_for(tier).monthly_assessments;

    UsageSummary {
        screening,
        full,
        total_tokens,
        assessments_used: used,
        assessment_limit: limit,
        percentage: usage_percentage(used, limit),
    }
}

/// `round(used / limit * 100)` in integer arithmetic
pub fn usage_percentage(used: u32, limit: AssessmentQuota) -> u32 {
    match limit {
        AssessmentQuota::Unlimited | AssessmentQuota::Limited(0) => 0,
        AssessmentQuota::Limited(quota) => {
            let used = u64::from(used);
            let quota = u64::from(quota);
            let pct = (used * 100 + quota / 2) / quota;
            u32::try_from(pct).unwrap_or(u32::MAX)
        }
    }
}

/// Records that fall inside the cycle starting at `cycle_start`
pub fn in_cycle<'a>(
    records: &'a [UsageRecord],
    cycle_start: DateTime<Utc>,
) -> impl Iterator<Item = &'a UsageRecord> + 'a {
    records.iter().filter(move |r| r.recorded_at >= cycle_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn record(kind: AssessmentKind, tokens: u64, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            org_id: Uuid::nil(),
            kind,
            tokens_used: tokens,
            assessment_id: None,
            recorded_at: at,
        }
    }

    #[test]
    fn test_summarize_counts() {
        let now = Utc::now();
        let records = vec![
            record(AssessmentKind::Screening, 1_200, now),
            record(AssessmentKind::Screening, 800, now),
            record(AssessmentKind::Full, 9_000, now),
        ];

        let summary = summarize(&records, PlanTier::Angel, 3);
        assert_eq!(summary.screening, 2);
        assert_eq!(summary.full, 1);
        assert_eq!(summary.total_tokens, 11_000);
        assert_eq!(summary.assessment_limit, AssessmentQuota::Limited(15));
        assert_eq!(summary.percentage, 20);
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(usage_percentage(1, AssessmentQuota::Limited(3)), 33);
        assert_eq!(usage_percentage(2, AssessmentQuota::Limited(3)), 67);
        assert_eq!(usage_percentage(3, AssessmentQuota::Limited(3)), 100);
        assert_eq!(usage_percentage(0, AssessmentQuota::Limited(50)), 0);
    }

    #[test]
    fn test_unlimited_is_zero_percent() {
        let summary = summarize(&[], PlanTier::Enterprise, 420);
        assert_eq!(summary.percentage, 0);
        assert_eq!(summary.assessment_limit, AssessmentQuota::Unlimited);
    }

    #[test]
    fn test_in_cycle_filter() {
        let start = Utc::now() - Duration::days(3);
        let records = vec![
            record(AssessmentKind::Full, 10, start - Duration::days(1)),
            record(AssessmentKind::Full, 20, start),
            record(AssessmentKind::Screening, 30, start + Duration::days(1)),
        ];

        let summary = summarize(in_cycle(&records, start), PlanTier::Pro, 2);
        assert_eq!(summary.full, 1);
        assert_eq!(summary.screening, 1);
        assert_eq!(summary.total_tokens, 50);
    }

    proptest! {
        #[test]
        fn percentage_never_uses_unlimited_sentinel(used in any::<u32>()) {
            prop_assert_eq!(usage_percentage(used, AssessmentQuota::Unlimited), 0);
        }

        #[test]
        fn percentage_is_zero_to_hundred_within_quota(quota in 1u32..10_000, frac in 0u32..=100) {
            let used = (u64::from(quota) * u64::from(frac) / 100) as u32;
            let pct = usage_percentage(used, AssessmentQuota::Limited(quota));
            prop_assert!(pct <= 100);
        }
    }
}
