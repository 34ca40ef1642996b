//! Notification Dispatcher (component C8) — the trait side.
//!
//! The transport (SMTP, a hosted email API, whatever) is an external
//! collaborator; this module defines the message shapes and the trait a
//! worker pool drains into. `courtcard-service::notify_worker` owns the
//! `mpsc` queue and retry loop; this crate only knows how to build and
//! hand off a [`Notification`].

use crate::model::{CourtCard, DigestBatch};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantConfirmation {
    pub participant_email: String,
    pub card_number: String,
    pub verdict: String,
    pub total_duration_min: f64,
    pub attendance_pct: f64,
    pub verification_url: String,
}

impl ParticipantConfirmation {
    pub fn from_card(card: &CourtCard, participant_email: &str) -> Self {
        ParticipantConfirmation {
            participant_email: participant_email.to_string(),
            card_number: card.number.clone(),
            verdict: match card.verdict {
                crate::model::Verdict::Passed => "PASSED".to_string(),
                crate::model::Verdict::Failed => "FAILED".to_string(),
            },
            total_duration_min: card.metrics.total_duration_min,
            attendance_pct: card.metrics.attendance_pct,
            verification_url: card.verification_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OfficerDigest {
    pub officer_email: String,
    pub date: chrono::NaiveDate,
    pub card_numbers: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Notification {
    ParticipantConfirmation(ParticipantConfirmation),
    OfficerDigest { digest: DigestBatch, officer_email: String, card_numbers: Vec<String> },
}

/// Send-side of the mail transport. Implementations must be idempotent
/// from the caller's perspective only in the sense of "send once per
/// call" — de-duplication (never re-sending a SENT digest) is the
/// dispatcher's job, tracked via `DigestBatch.status` in the store.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), String>;
}

/// Reference transport: logs instead of sending. Used by tests and by
/// `courtcard-service` until a real provider is configured.
pub struct LoggingMailTransport;

#[async_trait]
impl MailTransport for LoggingMailTransport {
    async fn send(&self, notification: &Notification) -> Result<(), String> {
        match notification {
            Notification::ParticipantConfirmation(c) => {
                tracing::info!(
                    to = %c.participant_email,
                    card_number = %c.card_number,
                    verdict = %c.verdict,
                    "participant confirmation sent"
                );
            }
            Notification::OfficerDigest { officer_email, card_numbers, .. } => {
                tracing::info!(
                    to = %officer_email,
                    count = card_numbers.len(),
                    "officer daily digest sent"
                );
            }
        }
        Ok(())
    }
}

/// Participant id is carried alongside the card purely so callers that
/// only have a session's ids on hand can build a confirmation without a
/// second store round-trip for the email address.
pub fn confirmation_for(card: &CourtCard, participant_email: &str) -> Notification {
    Notification::ParticipantConfirmation(ParticipantConfirmation::from_card(card, participant_email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_card() -> CourtCard {
        CourtCard {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            meeting_id: Uuid::new_v4(),
            join: Utc::now(),
            leave: Utc::now(),
            number: "CC-2026-00001-001".into(),
            participant_snapshot: ParticipantSnapshot {
                name: "A".into(),
                email: "a@example.com".into(),
                case_number: "CR-1".into(),
            },
            officer_snapshot: OfficerSnapshot {
                name: "O".into(),
                email: "o@court.gov".into(),
                badge: "B1".into(),
            },
            meeting_snapshot: MeetingSnapshot {
                name: "Group".into(),
                program: "AA".into(),
                scheduled_date: "2026-01-05".into(),
            },
            metrics: CardMetrics {
                total_duration_min: 60.0,
                active_duration_min: 60.0,
                idle_duration_min: 0.0,
                video_on_duration_min: 60.0,
                attendance_pct: 100.0,
            },
            verdict: Verdict::Passed,
            violations: vec![],
            explanation: String::new(),
            hash: "h".into(),
            prev_hash: "0".into(),
            chain_position: 1,
            verification_url: "https://example.com/verify/x".into(),
            qr_payload: "{}".into(),
            generated_at: Utc::now(),
            tampered: false,
        }
    }

    #[tokio::test]
    async fn logging_transport_accepts_confirmation() {
        let transport = LoggingMailTransport;
        let card = sample_card();
        let notification = confirmation_for(&card, &card.participant_snapshot.email);
        transport.send(&notification).await.unwrap();
    }
}
