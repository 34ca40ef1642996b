//! Validator (component C4).
//!
//! Applies the policy rule set R0–R8 to reconciled metrics plus the
//! scheduled meeting window, producing a verdict and an ordered
//! violation vector. Only CRITICAL violations flip the verdict to
//! FAILED; WARNING/INFO entries are advisory and ride along on the card.

use crate::config::{PolicyConfig, WindowRule};
use crate::model::{Severity, Verdict, Violation};
use crate::reconciler::ReconciliationOutput;
use chrono::{DateTime, Utc};

pub struct ValidationInput<'a> {
    pub reconciliation: &'a ReconciliationOutput,
    pub actual_join: DateTime<Utc>,
    pub actual_leave: DateTime<Utc>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub received_heartbeats: u64,
    /// Engagement score (0-100), if the client reported one in session
    /// metadata.
    pub engagement_score: Option<f64>,
}

pub struct ValidationOutput {
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    pub explanation: String,
}

fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 60_000.0
}

pub fn validate(input: &ValidationInput, policy: &PolicyConfig) -> ValidationOutput {
    let r = input.reconciliation;
    let mut violations: Vec<Violation> = Vec::new();
    let mut critical = false;

    // R0 — Attendance window (grace).
    let lateness = minutes_between(input.scheduled_start, input.actual_join).max(0.0);
    let early_departure = minutes_between(input.actual_leave, input.scheduled_end).max(0.0);
    let grace = policy.grace_window_min as f64;
    let window_violated = match policy.attendance_window_rule {
        WindowRule::MaxSide => lateness.max(early_departure) > grace,
        WindowRule::CumulativeSum => (lateness + early_departure) > grace,
    };
    if window_violated {
        let mut sides = Vec::new();
        if lateness > grace {
            sides.push(format!("joined {:.0} min late", lateness));
        }
        if early_departure > grace {
            sides.push(format!("left {:.0} min early", early_departure));
        }
        if sides.is_empty() {
            sides.push(format!(
                "combined lateness+early-departure of {:.0} min exceeds the {:.0} min grace window",
                lateness + early_departure,
                grace
            ));
        }
        violations.push(Violation {
            code: "ATTENDANCE_WINDOW_VIOLATION",
            severity: Severity::Critical,
            message: format!("Attendance window violated: {}", sides.join("; ")),
        });
        critical = true;
    }

    // R1 — Active ratio.
    if r.total_duration_min > 0.0 {
        let active_ratio = r.active_duration_min / r.total_duration_min;
        if active_ratio < 0.80 {
            violations.push(Violation {
                code: "LOW_ACTIVE_TIME",
                severity: Severity::Critical,
                message: format!(
                    "Active time ratio {:.1}% is below the required 80%",
                    active_ratio * 100.0
                ),
            });
            critical = true;
        }
    }

    // R2 — Idle ratio, with the engagement override.
    if r.total_duration_min > 0.0 {
        let idle_ratio = r.idle_duration_min / r.total_duration_min;
        if idle_ratio > 0.20 {
            let engagement_waives = input.engagement_score.map(|s| s >= 90.0).unwrap_or(false);
            let severity = if engagement_waives {
                Severity::Warning
            } else {
                critical = true;
                Severity::Critical
            };
            violations.push(Violation {
                code: "EXCESSIVE_IDLE_TIME",
                severity,
                message: format!(
                    "Idle time ratio {:.1}% exceeds the 20% limit{}",
                    idle_ratio * 100.0,
                    if engagement_waives {
                        " (waived: engagement score >= 90)"
                    } else {
                        ""
                    }
                ),
            });
        } else if idle_ratio > 0.0 {
            violations.push(Violation {
                code: "IDLE_TIME_PRESENT",
                severity: Severity::Info,
                message: format!("Idle time ratio {:.1}% is within limits", idle_ratio * 100.0),
            });
        }
    }

    // R3 — Coverage.
    let scheduled_duration_min = minutes_between(input.scheduled_start, input.scheduled_end);
    if scheduled_duration_min > 0.0 {
        let coverage = r.total_duration_min / scheduled_duration_min;
        if coverage < 0.80 {
            violations.push(Violation {
                code: "INSUFFICIENT_ATTENDANCE",
                severity: Severity::Critical,
                message: format!(
                    "Attendance coverage {:.1}% is below the required 80%",
                    coverage * 100.0
                ),
            });
            critical = true;
        } else if coverage < 0.90 {
            violations.push(Violation {
                code: "LOW_ATTENDANCE",
                severity: Severity::Warning,
                message: format!(
                    "Attendance coverage {:.1}% is low but above the 80% floor",
                    coverage * 100.0
                ),
            });
        }
    }

    // R6/R7/R8 — heartbeat posture.
    if input.received_heartbeats == 0 {
        violations.push(Violation {
            code: "NO_HEARTBEATS_RECEIVED",
            severity: Severity::Warning,
            message: "No client activity heartbeats were received for this session".to_string(),
        });
    } else if r.heartbeat_coverage < 0.50 {
        violations.push(Violation {
            code: "LOW_HEARTBEAT_COVERAGE",
            severity: Severity::Warning,
            message: format!(
                "Heartbeat coverage {:.1}% is below 50%",
                r.heartbeat_coverage * 100.0
            ),
        });
    } else if r.heartbeat_coverage >= 0.90 {
        violations.push(Violation {
            code: "GOOD_HEARTBEAT_COVERAGE",
            severity: Severity::Info,
            message: format!(
                "Heartbeat coverage {:.1}% indicates a complete activity record",
                r.heartbeat_coverage * 100.0
            ),
        });
    }

    let verdict = if critical { Verdict::Failed } else { Verdict::Passed };

    let explanation = format!(
        "Verdict: {:?}. total={:.1}min active={:.1}min idle={:.1}min attendance={:.1}% heartbeat_coverage={:.1}%. {} violation(s) recorded ({} critical).",
        verdict,
        r.total_duration_min,
        r.active_duration_min,
        r.idle_duration_min,
        r.attendance_pct,
        r.heartbeat_coverage * 100.0,
        violations.len(),
        violations.iter().filter(|v| v.severity == Severity::Critical).count(),
    );

    ValidationOutput {
        verdict,
        violations,
        explanation,
    }
}
