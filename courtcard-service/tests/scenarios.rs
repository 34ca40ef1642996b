//! End-to-end scenario tests: Normalizer -> Store -> Finalization
//! Scheduler (Reconciler -> Validator -> Card Issuer) -> Verifier ->
//! Signature Collector, wired together the way `main.rs` wires them,
//! but against a fresh [`InMemoryStore`] per test instead of the HTTP
//! surface.

use chrono::{DateTime, Duration, TimeZone, Utc};
use courtcard_core::auth::{InMemoryNonceStore, InMemoryPasswordVerifier};
use courtcard_core::config::{PolicyConfig, WindowRule};
use courtcard_core::issuer::CardIssuer;
use courtcard_core::model::*;
use courtcard_core::normalizer::{HeartbeatEvent, Normalizer, WebhookEvent};
use courtcard_core::notify::Notification;
use courtcard_core::signatures::{is_fully_signed, SignatureCollector, SignatureRequest};
use courtcard_core::store::Store;
use courtcard_core::verifier;
use courtcard_service::memstore::InMemoryStore;
use courtcard_service::scheduler;
use ed25519_dalek::SigningKey;
use uuid::Uuid;

/// Minutes past a fixed anchor, matching the style of `reconciler.rs`'s
/// own `t()` test helper so event offsets read the same way here as in
/// the unit tests they build on.
fn t(mins: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 19, 0, 0).unwrap() + Duration::minutes(mins)
}

async fn seed(
    store: &InMemoryStore,
    participant_email: &str,
    case_number: &str,
    scheduled_start: DateTime<Utc>,
    scheduled_duration_min: u32,
    provider_meeting_id: &str,
) -> (Participant, Officer, ExternalMeeting, Requirement) {
    let officer = Officer {
        id: Uuid::new_v4(),
        email: format!("officer-{}@court.gov", provider_meeting_id),
        name: "Officer Reyes".to_string(),
        badge: "B-1010".to_string(),
        organization: "County Probation".to_string(),
        is_active: true,
        version: 0,
    };
    store.put_officer(officer.clone()).await.unwrap();

    let participant = Participant {
        id: Uuid::new_v4(),
        email: participant_email.to_string(),
        name: "Participant".to_string(),
        case_number: case_number.to_string(),
        supervising_officer_id: Some(officer.id),
        is_active: true,
        timezone: Some("America/Denver".to_string()),
        version: 0,
    };
    store.put_participant(participant.clone()).await.unwrap();

    let meeting = ExternalMeeting {
        id: Uuid::new_v4(),
        provider_meeting_id: provider_meeting_id.to_string(),
        name: "Tuesday Night AA".to_string(),
        program: "AA".to_string(),
        scheduled_start,
        scheduled_duration_min,
        timezone: "America/Denver".to_string(),
        join_url: "https://provider.example.com/join/x".to_string(),
        passcode: None,
        tags: vec![],
    };
    store.put_external_meeting(meeting.clone()).await.unwrap();

    let requirement = Requirement {
        id: Uuid::new_v4(),
        participant_id: participant.id,
        officer_id: officer.id,
        total_meetings_required: 12,
        meetings_per_week: 2,
        required_programs: vec![],
        minimum_duration_min: 60,
        minimum_attendance_pct: 80.0,
        active: true,
        created_at: scheduled_start - Duration::days(1),
    };
    store.put_requirement(requirement.clone()).await.unwrap();

    (participant, officer, meeting, requirement)
}

fn webhook(meeting: &ExternalMeeting, participant: &Participant, kind: EventKind, at: DateTime<Utc>, provider_cumulative_sec: Option<i64>) -> WebhookEvent {
    WebhookEvent {
        provider_meeting_id: meeting.provider_meeting_id.clone(),
        participant_email: participant.email.clone(),
        kind,
        source_timestamp: Some(at),
        provider_cumulative_duration_sec: provider_cumulative_sec,
    }
}

#[tokio::test]
async fn happy_path_full_attendance_issues_a_passed_card() {
    let store = InMemoryStore::new();
    let policy = PolicyConfig::default();
    let normalizer = Normalizer::new(&policy);
    let (participant, _officer, meeting, _requirement) =
        seed(&store, "alice@example.com", "CR-2026-00042", t(0), 60, "meet-happy").await;

    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(0), webhook(&meeting, &participant, EventKind::Joined, t(0), None))
        .await
        .unwrap()
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(60), webhook(&meeting, &participant, EventKind::Left, t(60), Some(3600)))
        .await
        .unwrap();

    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    let (closed, issued, _digests_sent) =
        scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(76)).await.unwrap();
    assert_eq!(closed, 1);
    assert_eq!(issued, 1);

    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();
    assert_eq!(card.verdict, Verdict::Passed);
    assert!((card.metrics.total_duration_min - 60.0).abs() < 1e-9);
    assert!((card.metrics.attendance_pct - 100.0).abs() < 1e-9);

    let result = verifier::verify_by_id(&store, card.id).await.unwrap().unwrap();
    assert!(!result.tampered);

    match notify_rx.try_recv().unwrap() {
        Notification::ParticipantConfirmation(c) => assert_eq!(c.card_number, card.number),
        other => panic!("expected a participant confirmation, got {:?}", other),
    }
}

#[tokio::test]
async fn cumulative_window_rule_fails_a_session_max_side_would_pass() {
    let store = InMemoryStore::new();
    let mut policy = PolicyConfig::default();
    policy.attendance_window_rule = WindowRule::CumulativeSum;
    let normalizer = Normalizer::new(&policy);
    let (participant, _officer, meeting, _requirement) =
        seed(&store, "bob@example.com", "CR-2026-00099", t(0), 60, "meet-cumulative").await;

    // 6 min late, 6 min early: max(6, 6)=6 stays under the 10 min grace,
    // but 6+6=12 trips it under the cumulative rule.
    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(6), webhook(&meeting, &participant, EventKind::Joined, t(6), None))
        .await
        .unwrap()
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(54), webhook(&meeting, &participant, EventKind::Left, t(54), Some(48 * 60)))
        .await
        .unwrap();

    let (notify_tx, _rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(70)).await.unwrap();

    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();
    assert_eq!(card.verdict, Verdict::Failed);
    assert!(card.violations.iter().any(|v| v.code == "ATTENDANCE_WINDOW_VIOLATION"));
}

#[tokio::test]
async fn stale_abandoned_session_closes_with_insufficient_attendance() {
    let store = InMemoryStore::new();
    let policy = PolicyConfig::default();
    let normalizer = Normalizer::new(&policy);
    let (participant, _officer, meeting, _requirement) =
        seed(&store, "carol@example.com", "CR-2026-00123", t(0), 60, "meet-stale").await;

    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(0), webhook(&meeting, &participant, EventKind::Joined, t(0), None))
        .await
        .unwrap()
        .unwrap();
    // The client vanishes after one heartbeat; no LEAVE webhook ever arrives.
    normalizer
        .normalize_heartbeat(
            &store,
            t(5),
            HeartbeatEvent { session_id, kind: EventKind::Active, client_timestamp: Some(t(5)) },
        )
        .await
        .unwrap();

    let (notify_tx, _rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    let (closed, issued, _digests_sent) =
        scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(21)).await.unwrap();
    assert_eq!(closed, 1);
    assert_eq!(issued, 1);

    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();
    assert_eq!(card.leave, t(5));
    assert_eq!(card.verdict, Verdict::Failed);
    assert!(card.violations.iter().any(|v| v.code == "INSUFFICIENT_ATTENDANCE"));
}

#[tokio::test]
async fn rejoin_mid_session_merges_the_idle_gap_and_still_passes() {
    let store = InMemoryStore::new();
    let policy = PolicyConfig::default();
    let normalizer = Normalizer::new(&policy);
    let (participant, _officer, meeting, _requirement) =
        seed(&store, "dana@example.com", "CR-2026-00456", t(0), 60, "meet-rejoin").await;

    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(0), webhook(&meeting, &participant, EventKind::Joined, t(0), None))
        .await
        .unwrap()
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(20), webhook(&meeting, &participant, EventKind::Left, t(20), None))
        .await
        .unwrap();
    // Same IN_PROGRESS session: webhook LEFT/JOINED never flip status by
    // themselves, so the rejoin reattaches to the original session.
    normalizer
        .normalize_webhook(&store, t(28), webhook(&meeting, &participant, EventKind::Joined, t(28), None))
        .await
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(60), webhook(&meeting, &participant, EventKind::Left, t(60), Some(3120)))
        .await
        .unwrap();

    let (notify_tx, _rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(76)).await.unwrap();

    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();
    assert_eq!(card.verdict, Verdict::Passed);
    assert!((card.metrics.idle_duration_min - 8.0).abs() < 1e-9);
    assert!((card.metrics.active_duration_min - 52.0).abs() < 1e-9);
    assert!(card.violations.iter().any(|v| v.code == "IDLE_TIME_PRESENT"));
}

#[tokio::test]
async fn tampering_with_stored_card_content_flips_the_flag_irreversibly() {
    let store = InMemoryStore::new();
    let policy = PolicyConfig::default();
    let normalizer = Normalizer::new(&policy);
    let (participant, _officer, meeting, _requirement) =
        seed(&store, "erin@example.com", "CR-2026-00789", t(0), 60, "meet-tamper").await;

    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(0), webhook(&meeting, &participant, EventKind::Joined, t(0), None))
        .await
        .unwrap()
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(60), webhook(&meeting, &participant, EventKind::Left, t(60), Some(3600)))
        .await
        .unwrap();

    let (notify_tx, _rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(76)).await.unwrap();

    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();
    let clean = verifier::verify_by_id(&store, card.id).await.unwrap().unwrap();
    assert!(!clean.tampered);

    let mut mutated = card.clone();
    mutated.metrics.total_duration_min += 5.0;
    store.put_card(mutated).await.unwrap();

    let flagged = verifier::verify_by_id(&store, card.id).await.unwrap().unwrap();
    assert!(flagged.tampered);

    // Recomputation only ever runs while `tampered` is still false; a
    // second read finds it already flagged and leaves it flagged.
    let flagged_again = verifier::verify_by_id(&store, card.id).await.unwrap().unwrap();
    assert!(flagged_again.tampered);
}

#[tokio::test]
async fn both_signatures_complete_a_card_regardless_of_order() {
    let store = InMemoryStore::new();
    let policy = PolicyConfig::default();
    let normalizer = Normalizer::new(&policy);
    let (participant, officer, meeting, _requirement) =
        seed(&store, "frank@example.com", "CR-2026-01011", t(0), 60, "meet-signatures").await;

    let (session_id, _) = normalizer
        .normalize_webhook(&store, t(0), webhook(&meeting, &participant, EventKind::Joined, t(0), None))
        .await
        .unwrap()
        .unwrap();
    normalizer
        .normalize_webhook(&store, t(60), webhook(&meeting, &participant, EventKind::Left, t(60), Some(3600)))
        .await
        .unwrap();

    let (notify_tx, _rx) = tokio::sync::mpsc::channel::<Notification>(8);
    let base_url = "https://verify.example.gov".to_string();
    let issuer = CardIssuer::new(&base_url);
    scheduler::run_tick(&store, &policy, &issuer, &notify_tx, "18:00", t(76)).await.unwrap();
    let card = store.get_card_by_session(session_id).await.unwrap().unwrap();

    let participant_key = SigningKey::from_bytes(&[7u8; 32]);
    let host_key = SigningKey::from_bytes(&[9u8; 32]);
    let passwords = InMemoryPasswordVerifier::new();
    passwords.set(participant.id, "correct horse battery staple").await;
    let nonces = InMemoryNonceStore::new();
    let nonce = nonces.issue(card.id, &officer.email, t(80), 7).await;

    let collector = SignatureCollector {
        password_verifier: &passwords,
        nonce_store: &nonces,
        participant_key: &participant_key,
        host_key: &host_key,
        policy: &policy,
    };

    // Host signs first.
    let (_host_sig, fully_signed) = collector
        .collect(
            &store,
            SignatureRequest {
                card_id: card.id,
                role: SignerRole::Host,
                method: AuthMethod::EmailLink,
                signer_id: None,
                signer_name: officer.name.clone(),
                signer_email: officer.email.clone(),
                credential: nonce,
                ip: None,
                user_agent: None,
            },
            t(80),
        )
        .await
        .unwrap();
    assert!(!fully_signed);

    // Participant signs second; order doesn't matter for completeness.
    let (_participant_sig, fully_signed) = collector
        .collect(
            &store,
            SignatureRequest {
                card_id: card.id,
                role: SignerRole::Participant,
                method: AuthMethod::Password,
                signer_id: Some(participant.id),
                signer_name: participant.name.clone(),
                signer_email: participant.email.clone(),
                credential: "correct horse battery staple".to_string(),
                ip: None,
                user_agent: None,
            },
            t(81),
        )
        .await
        .unwrap();
    assert!(fully_signed);

    let signatures = store.get_signatures(card.id).await.unwrap();
    assert!(is_fully_signed(&signatures));

    // A second attempt at an already-signed role is rejected outright.
    let err = collector
        .collect(
            &store,
            SignatureRequest {
                card_id: card.id,
                role: SignerRole::Participant,
                method: AuthMethod::Password,
                signer_id: Some(participant.id),
                signer_name: participant.name.clone(),
                signer_email: participant.email.clone(),
                credential: "correct horse battery staple".to_string(),
                ip: None,
                user_agent: None,
            },
            t(82),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SIGNATURE_EXISTS");
}
