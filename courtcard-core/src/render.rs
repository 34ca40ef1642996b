//! Card rasterization collaborator, backing `GET /card/{id}/pdf`.
//!
//! Actual PDF/QR-image generation is out of scope (spec §1 excludes the
//! rasterizer); this trait is the seam a real renderer plugs into, and
//! the reference implementation below produces a deterministic plain-
//! text rendition so the route has something real to return in tests.

use crate::model::CourtCard;
use async_trait::async_trait;

#[async_trait]
pub trait CardRenderer: Send + Sync {
    /// Render a card to bytes in whatever format this renderer produces
    /// (PDF in production; plain text for the reference renderer).
    async fn render(&self, card: &CourtCard) -> Result<Vec<u8>, String>;

    fn content_type(&self) -> &'static str;
}

pub struct PlainTextCardRenderer;

#[async_trait]
impl CardRenderer for PlainTextCardRenderer {
    async fn render(&self, card: &CourtCard) -> Result<Vec<u8>, String> {
        let body = format!(
            "Court Card {}\nParticipant: {} ({})\nOfficer: {}\nMeeting: {} on {}\nVerdict: {:?}\nAttendance: {:.1}%\nChain position: {}\nVerify at: {}\n",
            card.number,
            card.participant_snapshot.name,
            card.participant_snapshot.case_number,
            card.officer_snapshot.name,
            card.meeting_snapshot.name,
            card.meeting_snapshot.scheduled_date,
            card.verdict,
            card.metrics.attendance_pct,
            card.chain_position,
            card.verification_url,
        );
        Ok(body.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn renders_core_fields() {
        let card = CourtCard {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            meeting_id: Uuid::new_v4(),
            join: Utc::now(),
            leave: Utc::now(),
            number: "CC-2026-00001-001".into(),
            participant_snapshot: ParticipantSnapshot {
                name: "Jordan Lee".into(),
                email: "jordan@example.com".into(),
                case_number: "CR-2024-0042".into(),
            },
            officer_snapshot: OfficerSnapshot {
                name: "Officer Park".into(),
                email: "park@court.gov".into(),
                badge: "B100".into(),
            },
            meeting_snapshot: MeetingSnapshot {
                name: "Tuesday Group".into(),
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
            chain_position: 3,
            verification_url: "https://example.com/verify/x".into(),
            qr_payload: "{}".into(),
            generated_at: Utc::now(),
            tampered: false,
        };
        let renderer = PlainTextCardRenderer;
        let bytes = renderer.render(&card).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("CC-2026-00001-001"));
        assert!(text.contains("Jordan Lee"));
    }
}
