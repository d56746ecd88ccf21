//! Billing Cycle Rollover
//!
//! The monthly assessment counter resets at calendar-month boundaries
//! measured from `billing_cycle_anchor`. Boundaries are always `anchor + n`
//! months, so a month-end anchor clamps in short months without drifting.

use chrono::{DateTime, Months, Utc};

use crate::model::Organization;

/// Latest cycle boundary `<= now`, stepping whole months from `anchor`
pub fn current_cycle_start(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now <= anchor {
        return anchor;
    }

    let mut months = 0u32;
    let mut boundary = anchor;
    loop {
        let Some(next) = anchor.checked_add_months(Months::new(months + 1)) else {
            return boundary;
        };
        if next > now {
            return boundary;
        }
        months += 1;
        boundary = next;
    }
}

/// Advance the organization into the cycle containing `now`.
///
/// Returns `true` when a boundary was crossed and the counter was reset.
pub fn rollover(org: &mut Organization, now: DateTime<Utc>) -> bool {
    let start = current_cycle_start(org.billing_cycle_anchor, now);
    if start <= org.billing_cycle_start {
        return false;
    }

    tracing::debug!(
        org_id = %org.id,
        previous = %org.billing_cycle_start,
        current = %start,
        "billing cycle rolled over"
    );
    org.billing_cycle_start = start;
    org.assessments_used_this_month = 0;
    true
}

/// Start a fresh cycle at `now` (new subscription)
pub fn restart(org: &mut Organization, now: DateTime<Utc>) {
    org.billing_cycle_anchor = now;
    org.billing_cycle_start = now;
    org.assessments_used_this_month = 0;
}
