//! Card Issuer (component C5).
//!
//! Deterministically numbers, hashes, and persists the Court Card;
//! generates the verification URL and QR payload; maintains the
//! per-participant hash chain. Runs once per Session, on entry to
//! COMPLETED, and only if no card exists yet for that session.

use crate::canonical::{canonical_hash, ZERO_HASH};
use crate::error::CoreResult;
use crate::model::*;
use crate::reconciler::ReconciliationOutput;
use crate::store::Store;
use crate::validator::ValidationOutput;
use chrono::{DateTime, Datelike, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Last 5 digits of the case number, left-padded with zeros. Non-digit
/// characters (e.g. `CR-2024-0042`) are stripped before taking the tail.
fn case_digits5(case_number: &str) -> String {
    let digits: String = case_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits.chars().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{:0>5}", tail)
}

/// Builds the exact JSON structure that is hashed into a card's `hash`
/// field. Used both at issuance time and by [`recompute_hash`] for the
/// tamper check — the two call sites must stay byte-identical, so every
/// field here is read from the card's own snapshot shape rather than
/// from the live `Session`/`Participant`/etc. records, which may have
/// since changed.
#[allow(clippy::too_many_arguments)]
fn canonical_content(
    session_id: Id,
    participant_email: &str,
    case_number: &str,
    officer_email: &str,
    meeting_id: Id,
    meeting_name: &str,
    meeting_date: &str,
    join: DateTime<Utc>,
    leave: DateTime<Utc>,
    durations: &CardMetrics,
    verdict: Verdict,
) -> serde_json::Value {
    json!({
        "sessionId": session_id,
        "participantEmail": participant_email,
        "caseNumber": case_number,
        "officerEmail": officer_email,
        "meetingId": meeting_id,
        "meetingName": meeting_name,
        "meetingDate": meeting_date,
        "join": join.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "leave": leave.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "durations": {
            "totalMin": durations.total_duration_min,
            "activeMin": durations.active_duration_min,
            "idleMin": durations.idle_duration_min,
            "videoOnMin": durations.video_on_duration_min,
        },
        "attendancePct": durations.attendance_pct,
        "verdict": match verdict {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
        },
    })
}

pub struct CardIssuer<'a> {
    pub public_base_url: &'a str,
}

impl<'a> CardIssuer<'a> {
    pub fn new(public_base_url: &'a str) -> Self {
        CardIssuer { public_base_url }
    }

    pub async fn issue(
        &self,
        store: &dyn Store,
        session: &Session,
        participant: &Participant,
        officer: &Officer,
        meeting: &ExternalMeeting,
        reconciliation: &ReconciliationOutput,
        validation: ValidationOutput,
        now: DateTime<Utc>,
    ) -> CoreResult<CourtCard> {
        let year = now.year();
        let seq = store.next_card_sequence(year, &participant.case_number).await?;
        let number = format!("CC-{}-{}-{:03}", year, case_digits5(&participant.case_number), seq);

        let leave = session.leave_time.unwrap_or(now);
        let meeting_date = meeting.scheduled_start.format("%Y-%m-%d").to_string();
        let metrics = CardMetrics {
            total_duration_min: reconciliation.total_duration_min,
            active_duration_min: reconciliation.active_duration_min,
            idle_duration_min: reconciliation.idle_duration_min,
            video_on_duration_min: reconciliation.video_on_duration_min,
            attendance_pct: reconciliation.attendance_pct,
        };
        let content = canonical_content(
            session.id,
            &participant.email,
            &participant.case_number,
            &officer.email,
            meeting.id,
            &meeting.name,
            &meeting_date,
            session.join_time,
            leave,
            &metrics,
            validation.verdict,
        );
        let hash = canonical_hash(&content);

        let prev = store.get_last_card_for_participant(participant.id).await?;
        let prev_hash = prev.map(|c| c.hash).unwrap_or_else(|| ZERO_HASH.to_string());
        let chain_position = store.next_chain_position(participant.id).await?;

        let card_id = Uuid::new_v4();
        let verification_url = format!("{}/verify/{}", self.public_base_url.trim_end_matches('/'), card_id);
        let qr_payload = serde_json::to_string(&json!({
            "cn": number,
            "id": card_id,
            "h": &hash[..32.min(hash.len())],
        }))
        .expect("QR payload serialization is infallible");

        let card = CourtCard {
            id: card_id,
            session_id: session.id,
            meeting_id: meeting.id,
            join: session.join_time,
            leave,
            number,
            participant_snapshot: ParticipantSnapshot {
                name: participant.name.clone(),
                email: participant.email.clone(),
                case_number: participant.case_number.clone(),
            },
            officer_snapshot: OfficerSnapshot {
                name: officer.name.clone(),
                email: officer.email.clone(),
                badge: officer.badge.clone(),
            },
            meeting_snapshot: MeetingSnapshot {
                name: meeting.name.clone(),
                program: meeting.program.clone(),
                scheduled_date: meeting_date,
            },
            metrics,
            verdict: validation.verdict,
            violations: validation.violations,
            explanation: validation.explanation,
            hash,
            prev_hash,
            chain_position,
            verification_url,
            qr_payload,
            generated_at: now,
            tampered: false,
        };

        store.put_card(card.clone()).await?;
        store.mark_card_issued(session.id).await?;
        info!(
            card_number = %card.number,
            session_id = %session.id,
            verdict = ?card.verdict,
            chain_position = card.chain_position,
            "court card issued"
        );
        Ok(card)
    }
}

/// Recompute a card's hash from its snapshot and compare to the stored
/// hash (component C5's integrity check, shared with the Verifier).
pub fn recompute_hash(card: &CourtCard) -> String {
    let content = canonical_content(
        card.session_id,
        &card.participant_snapshot.email,
        &card.participant_snapshot.case_number,
        &card.officer_snapshot.email,
        card.meeting_id,
        &card.meeting_snapshot.name,
        &card.meeting_snapshot.scheduled_date,
        card.join,
        card.leave,
        &card.metrics,
        card.verdict,
    );
    canonical_hash(&content)
}
