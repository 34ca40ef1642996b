//! Requirement Engine (component C10).
//!
//! A pure function over a participant's valid cards (verdict=PASSED,
//! not tampered) and their active [`Requirement`]: computes a rolling
//! compliance status. Cumulative and weekly modes are mutually
//! exclusive, selected by `totalMeetingsRequired > 0` per spec.
//!
//! The program-tag eligibility filter (`requiredPrograms`) is applied
//! only when counting valid meetings here — it is not applied by the
//! Reconciler or Validator, which evaluate a single session in isolation
//! without knowledge of the participant's requirement.

use crate::model::{ComplianceStatus, CourtCard, Requirement, Verdict};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct ComplianceReport {
    pub status: ComplianceStatus,
    pub valid_count: u32,
    pub required: u32,
}

fn is_valid(card: &CourtCard) -> bool {
    card.verdict == Verdict::Passed && !card.tampered
}

fn matches_programs(card: &CourtCard, required_programs: &[String]) -> bool {
    required_programs.is_empty() || required_programs.iter().any(|p| p == &card.meeting_snapshot.program)
}

/// Start of the current week (Sunday 00:00) in the given timezone,
/// expressed back in UTC. Falls back to UTC if `tz` is absent or unknown.
fn week_start(now: DateTime<Utc>, tz: Option<&str>) -> DateTime<Utc> {
    match tz.and_then(|s| s.parse::<Tz>().ok()) {
        Some(tz) => {
            let local_now = now.with_timezone(&tz);
            let days_since_sunday = local_now.weekday().num_days_from_sunday();
            let midnight_date = local_now.date_naive() - chrono::Duration::days(days_since_sunday as i64);
            let midnight = midnight_date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            tz.from_local_datetime(&midnight)
                .single()
                .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
                .with_timezone(&Utc)
        }
        None => {
            let days_since_sunday = now.weekday().num_days_from_sunday();
            let midnight_date = now.date_naive() - chrono::Duration::days(days_since_sunday as i64);
            let midnight = midnight_date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            Utc.from_utc_datetime(&midnight)
        }
    }
}

pub fn evaluate(
    requirement: &Requirement,
    cards: &[CourtCard],
    now: DateTime<Utc>,
    participant_timezone: Option<&str>,
) -> ComplianceReport {
    let eligible: Vec<&CourtCard> = cards
        .iter()
        .filter(|c| is_valid(c) && matches_programs(c, &requirement.required_programs))
        .collect();

    if requirement.total_meetings_required > 0 {
        let valid_count = eligible.len() as u32;
        let status = if valid_count >= requirement.total_meetings_required {
            ComplianceStatus::Compliant
        } else if valid_count > 0 {
            ComplianceStatus::InProgress
        } else {
            ComplianceStatus::NotStarted
        };
        ComplianceReport {
            status,
            valid_count,
            required: requirement.total_meetings_required,
        }
    } else {
        let boundary = week_start(now, participant_timezone);
        let valid_count = eligible.iter().filter(|c| c.generated_at >= boundary).count() as u32;
        let status = if valid_count >= requirement.meetings_per_week {
            ComplianceStatus::Compliant
        } else if valid_count > 0 {
            ComplianceStatus::AtRisk
        } else {
            ComplianceStatus::NonCompliant
        };
        ComplianceReport {
            status,
            valid_count,
            required: requirement.meetings_per_week,
        }
    }
}
