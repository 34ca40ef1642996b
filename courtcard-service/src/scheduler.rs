//! Finalization Scheduler (component C7).
//!
//! A single leader-elected tick, mirroring the teacher's
//! `tokio::spawn`-based background watcher: stale-session sweep, then
//! the issuance sweep (Reconciler → Validator → Card Issuer under a
//! per-session retry budget, enqueuing each issued card into its
//! officer's daily digest batch), then the digest dispatch sweep that
//! sends any batch past its cutoff.

use courtcard_core::config::PolicyConfig;
use courtcard_core::error::{CoreError, CoreResult};
use courtcard_core::issuer::CardIssuer;
use courtcard_core::model::*;
use courtcard_core::notify;
use courtcard_core::reconciler::reconcile;
use courtcard_core::store::{CasOutcome, DerivedUpdate, Store};
use courtcard_core::validator::{self, ValidationInput};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

const MAX_ISSUANCE_RETRIES: u32 = 3;
const MAX_DIGEST_SEND_RETRIES: u32 = 3;

/// Run one finalization tick. Returns the number of sessions
/// transitioned by the stale sweep, the number of cards issued, and the
/// number of officer digests dispatched, for callers (tests, the
/// periodic task) that want to log progress.
pub async fn run_tick(
    store: &dyn Store,
    policy: &PolicyConfig,
    issuer: &CardIssuer<'_>,
    notify_tx: &tokio::sync::mpsc::Sender<notify::Notification>,
    digest_cutoff_local_time: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<(usize, usize, usize)> {
    let stale_closed = stale_sweep(store, policy, now).await?;
    let issued = issuance_sweep(store, policy, issuer, notify_tx, now).await?;
    let digests_sent = digest_dispatch_sweep(store, notify_tx, digest_cutoff_local_time, now).await?;
    Ok((stale_closed, issued, digests_sent))
}

/// Close `IN_PROGRESS` sessions whose last event is older than
/// `min(policy.session_idle_grace_min, 0.25 * scheduledDurationMin)`.
async fn stale_sweep(store: &dyn Store, policy: &PolicyConfig, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let mut closed = 0;
    for session in store.list_in_progress_sessions().await? {
        let meeting = match store.get_external_meeting(session.external_meeting_id).await? {
            Some(m) => m,
            None => {
                warn!(session_id = %session.id, "stale sweep: session references unknown meeting");
                continue;
            }
        };
        let quarter_scheduled = (meeting.scheduled_duration_min as f64 * 0.25) as i64;
        let grace = Duration::minutes(policy.session_idle_grace_min.min(quarter_scheduled.max(1)));
        let last_event = session.last_event_time();
        if now - last_event <= grace {
            continue;
        }

        let synthetic_left = TimelineEvent {
            seq: 0,
            t: last_event,
            kind: EventKind::Left,
            source: EventSource::Api,
            data: serde_json::json!({ "synthetic": true }),
        };
        store.append_event(session.id, synthetic_left).await?;

        let update = DerivedUpdate {
            totals: session.totals.clone(),
            attendance_pct: session.attendance_pct,
            verification_method: session.verification_method,
            status: SessionStatus::Completed,
            leave_time: Some(last_event),
            is_valid: session.is_valid,
        };
        match store.update_derived(session.id, session.version, update).await? {
            CasOutcome::Applied(_) => {
                info!(session_id = %session.id, "stale session closed by finalizer");
                closed += 1;
            }
            CasOutcome::Conflict => {
                warn!(session_id = %session.id, "stale sweep lost the CAS race, leaving for next tick");
            }
        }
    }
    Ok(closed)
}

/// Run Reconciler → Validator → Card Issuer for every `COMPLETED`
/// session with `cardIssued=false`, retrying transient failures up to
/// [`MAX_ISSUANCE_RETRIES`] times with exponential backoff, and enqueue
/// a participant confirmation plus the officer's daily digest entry.
async fn issuance_sweep(
    store: &dyn Store,
    policy: &PolicyConfig,
    issuer: &CardIssuer<'_>,
    notify_tx: &tokio::sync::mpsc::Sender<notify::Notification>,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let mut issued = 0;
    for session in store.list_completed_unissued_sessions().await? {
        match finalize_one(store, policy, issuer, &session, now).await {
            Ok(card) => {
                issued += 1;
                if let Some(participant) = store.get_participant(session.participant_id).await? {
                    let confirmation = notify::confirmation_for(&card, &participant.email);
                    let _ = notify_tx.send(confirmation).await;
                }
                enqueue_digest(store, &session, now).await?;
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "issuance failed after retries");
            }
        }
    }
    Ok(issued)
}

async fn finalize_one(
    store: &dyn Store,
    policy: &PolicyConfig,
    issuer: &CardIssuer<'_>,
    session: &Session,
    now: DateTime<Utc>,
) -> CoreResult<CourtCard> {
    let mut attempt = 0;
    loop {
        match try_finalize_once(store, policy, issuer, session, now).await {
            Ok(card) => return Ok(card),
            Err(err) if attempt < MAX_ISSUANCE_RETRIES && matches!(err, CoreError::Transient { .. }) => {
                attempt += 1;
                let backoff_ms = 100u64 * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn try_finalize_once(
    store: &dyn Store,
    policy: &PolicyConfig,
    issuer: &CardIssuer<'_>,
    session: &Session,
    now: DateTime<Utc>,
) -> CoreResult<CourtCard> {
    let participant = store
        .get_participant(session.participant_id)
        .await?
        .ok_or_else(|| CoreError::DataBug { message: "session references unknown participant".into() })?;
    let officer = store
        .get_officer(session.officer_id)
        .await?
        .ok_or_else(|| CoreError::DataBug { message: "session references unknown officer".into() })?;
    let meeting = store
        .get_external_meeting(session.external_meeting_id)
        .await?
        .ok_or_else(|| CoreError::DataBug { message: "session references unknown meeting".into() })?;

    let leave_time = session
        .leave_time
        .ok_or_else(|| CoreError::DataBug { message: "completed session has no leave_time".into() })?;

    let timeline = store.read_timeline(session.id).await?;
    let reconciliation = reconcile(
        &timeline,
        session.join_time,
        leave_time,
        meeting.scheduled_duration_min as f64,
        policy.heartbeat_period_sec,
    );

    let received_heartbeats = timeline
        .iter()
        .filter(|e| e.source == EventSource::Heartbeat && (e.kind == EventKind::Active || e.kind == EventKind::Idle))
        .count() as u64;
    let engagement_score = session
        .metadata
        .get("engagement_score")
        .and_then(|v| v.as_f64());

    let validation_input = ValidationInput {
        reconciliation: &reconciliation,
        actual_join: session.join_time,
        actual_leave: leave_time,
        scheduled_start: meeting.scheduled_start,
        scheduled_end: meeting.scheduled_end(),
        received_heartbeats,
        engagement_score,
    };
    let validation = validator::validate(&validation_input, policy);

    let update = DerivedUpdate {
        totals: SessionTotals {
            total_duration_min: reconciliation.total_duration_min,
            active_duration_min: reconciliation.active_duration_min,
            idle_duration_min: reconciliation.idle_duration_min,
            video_on_duration_min: reconciliation.video_on_duration_min,
        },
        attendance_pct: reconciliation.attendance_pct,
        verification_method: session.verification_method,
        status: SessionStatus::Completed,
        leave_time: Some(leave_time),
        is_valid: Some(matches!(validation.verdict, Verdict::Passed)),
    };
    match store.update_derived(session.id, session.version, update).await? {
        CasOutcome::Applied(_) => {}
        CasOutcome::Conflict => {
            return Err(CoreError::transient("lost the session CAS race during issuance"));
        }
    }

    issuer
        .issue(store, session, &participant, &officer, &meeting, &reconciliation, validation, now)
        .await
}

async fn enqueue_digest(store: &dyn Store, session: &Session, now: DateTime<Utc>) -> anyhow::Result<()> {
    let date = now.date_naive();
    store.append_to_digest(session.officer_id, date, session.id).await?;
    Ok(())
}

fn parse_cutoff(cutoff: &str) -> (u32, u32) {
    let mut parts = cutoff.splitn(2, ':');
    let hour = parts.next().and_then(|s| s.parse().ok()).unwrap_or(18);
    let minute = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (hour, minute)
}

fn cutoff_passed(date: chrono::NaiveDate, cutoff: (u32, u32), now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if today > date {
        return true;
    }
    if today < date {
        return false;
    }
    let (hour, minute) = cutoff;
    let cutoff_time = chrono::NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(chrono::NaiveTime::MIN);
    now.time() >= cutoff_time
}

async fn build_digest_notification(store: &dyn Store, batch: &DigestBatch) -> CoreResult<notify::Notification> {
    let officer = store
        .get_officer(batch.officer_id)
        .await?
        .ok_or_else(|| CoreError::DataBug { message: "digest batch references unknown officer".into() })?;

    let mut card_numbers = Vec::with_capacity(batch.session_ids.len());
    for session_id in &batch.session_ids {
        if let Some(card) = store.get_card_by_session(*session_id).await? {
            card_numbers.push(card.number);
        }
    }

    Ok(notify::Notification::OfficerDigest {
        digest: batch.clone(),
        officer_email: officer.email,
        card_numbers,
    })
}

/// Render and enqueue each officer's daily digest once its configured
/// local-time cutoff has passed. A batch is marked `SENT` only after the
/// handoff to the notification queue succeeds, `FAILED` (and retried on
/// a later tick, up to [`MAX_DIGEST_SEND_RETRIES`]) otherwise; a batch
/// already `SENT` never comes back from `list_pending_digests` and so is
/// never re-enqueued.
async fn digest_dispatch_sweep(
    store: &dyn Store,
    notify_tx: &tokio::sync::mpsc::Sender<notify::Notification>,
    digest_cutoff_local_time: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let cutoff = parse_cutoff(digest_cutoff_local_time);
    let mut sent = 0;
    for batch in store.list_pending_digests().await? {
        if batch.attempts >= MAX_DIGEST_SEND_RETRIES {
            continue;
        }
        if !cutoff_passed(batch.date, cutoff, now) {
            continue;
        }

        let notification = match build_digest_notification(store, &batch).await {
            Ok(n) => n,
            Err(err) => {
                warn!(officer_id = %batch.officer_id, date = %batch.date, error = %err, "digest dispatch failed");
                store.mark_digest_failed(batch.officer_id, batch.date).await?;
                continue;
            }
        };

        if notify_tx.send(notification).await.is_ok() {
            if store.mark_digest_sent(batch.officer_id, batch.date).await? {
                sent += 1;
            }
        } else {
            warn!(officer_id = %batch.officer_id, date = %batch.date, "notification queue closed, marking digest failed");
            store.mark_digest_failed(batch.officer_id, batch.date).await?;
        }
    }
    Ok(sent)
}
