//! Pure recurrence math for subscription delivery schedules.
//!
//! The calculator is a free function over the subscription's recurrence
//! fields rather than a method on the persisted entity, so the temporal
//! policy can be unit-tested without a database. Weekday indices use
//! Sunday = 0 throughout.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

use crate::model::Frequency;

/// The recurrence fields of a subscription, extracted as plain input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Configured delivery weekdays. May be empty; weekly frequencies fall
    /// back to defaults (`weekly` -> Monday, `twice_week` -> Monday and
    /// Thursday) so an unconfigured schedule can never stall.
    pub delivery_days: Vec<Weekday>,
    /// Day of month (1-28) for monthly schedules.
    pub delivery_day_of_month: Option<u32>,
}

/// Compute the next delivery date after `anchor`.
///
/// If the anchor has drifted into the past (e.g. after downtime) the
/// baseline is clamped to `today`: the schedule catches up with a single
/// order instead of one per missed interval. The result is always strictly
/// after `anchor`, and the function is deterministic for identical inputs.
pub fn next_delivery_date(rule: &RecurrenceRule, anchor: NaiveDate, today: NaiveDate) -> NaiveDate {
    let base = if anchor < today { today } else { anchor };

    match rule.frequency {
        Frequency::Daily => base + Duration::days(1),
        Frequency::AlternateDays => base + Duration::days(2),
        Frequency::Weekly | Frequency::TwiceWeek => {
            next_configured_weekday(base, &effective_days(rule))
        }
        Frequency::Fortnightly => {
            let candidate = base + Duration::days(14);
            if rule.delivery_days.is_empty() {
                candidate
            } else {
                snap_forward(candidate, &rule.delivery_days)
            }
        }
        Frequency::Monthly => next_monthly(rule, base),
    }
}

fn effective_days(rule: &RecurrenceRule) -> Vec<Weekday> {
    if !rule.delivery_days.is_empty() {
        rule.delivery_days.clone()
    } else if rule.frequency == Frequency::TwiceWeek {
        vec![Weekday::Mon, Weekday::Thu]
    } else {
        vec![Weekday::Mon]
    }
}

fn sorted_indices(days: &[Weekday]) -> Vec<u32> {
    let mut indices: Vec<u32> = days.iter().map(|d| d.num_days_from_sunday()).collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Smallest configured weekday strictly after `base` within the same week,
/// wrapping to the earliest configured weekday of the following week.
/// Advances by at least 1 and at most 13 days.
fn next_configured_weekday(base: NaiveDate, days: &[Weekday]) -> NaiveDate {
    let indices = sorted_indices(days);
    let cur = base.weekday().num_days_from_sunday();
    match indices.iter().find(|&&i| i > cur) {
        Some(&i) => base + Duration::days(i64::from(i - cur)),
        None => base + Duration::days(i64::from(7 - cur + indices[0])),
    }
}

/// Keep `candidate` if its weekday is configured, otherwise move forward to
/// the next configured weekday. Never moves backward.
fn snap_forward(candidate: NaiveDate, days: &[Weekday]) -> NaiveDate {
    let cur = candidate.weekday().num_days_from_sunday();
    if days.iter().any(|d| d.num_days_from_sunday() == cur) {
        candidate
    } else {
        next_configured_weekday(candidate, days)
    }
}

fn next_monthly(rule: &RecurrenceRule, base: NaiveDate) -> NaiveDate {
    // checked_add_months clamps the day to the target month's length
    // (Jan 31 -> Feb 28/29).
    let advanced = base
        .checked_add_months(Months::new(1))
        .expect("date within chrono range");

    if let Some(dom) = rule.delivery_day_of_month {
        // 1-28 is valid in every month.
        return advanced.with_day(dom).unwrap_or(advanced);
    }

    if let Some(&target) = rule.delivery_days.first() {
        let cur = advanced.weekday().num_days_from_sunday();
        let add = (target.num_days_from_sunday() + 7 - cur) % 7;
        let shifted = advanced + Duration::days(i64::from(add));
        // The weekday adjustment must not cross into a third month.
        if shifted.month() != advanced.month() {
            return last_day_of_month(advanced);
        }
        return shifted;
    }

    advanced
}

fn last_day_of_month(d: NaiveDate) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("valid first of month");
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .expect("date within chrono range")
}
