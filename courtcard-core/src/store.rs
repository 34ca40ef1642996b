//! The Timeline Store trait boundary (component C1).
//!
//! The storage engine itself is an external collaborator (spec §1); this
//! module only defines the contract it must satisfy: idempotent append,
//! optimistic-concurrency derived-field updates, and lookups needed by
//! every other component. `courtcard-service::memstore` ships the
//! reference in-memory implementation used by the HTTP service and by
//! the scenario tests in `tests/scenarios.rs`.

use crate::error::CoreResult;
use crate::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    Duplicate,
}

/// Fields the reconciler/validator compute and want swapped in atomically.
#[derive(Debug, Clone)]
pub struct DerivedUpdate {
    pub totals: SessionTotals,
    pub attendance_pct: f64,
    pub verification_method: VerificationMethod,
    pub status: SessionStatus,
    pub leave_time: Option<DateTime<Utc>>,
    pub is_valid: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied(u64),
    Conflict,
}

/// The append-only, optimistically-concurrent Timeline Store.
///
/// Implementors must guarantee: append is idempotent on
/// `TimelineEvent::dedup_key`; `update_derived` only applies when the
/// caller's `expected_version` matches the stored version (compare-and-
/// swap); reads never block writes.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- Sessions / timeline (C1) ----
    async fn create_session(&self, session: Session) -> CoreResult<()>;
    async fn get_session(&self, id: Id) -> CoreResult<Option<Session>>;
    async fn append_event(&self, session_id: Id, event: TimelineEvent) -> CoreResult<AppendOutcome>;
    async fn read_timeline(&self, session_id: Id) -> CoreResult<Vec<TimelineEvent>>;
    async fn update_derived(
        &self,
        session_id: Id,
        expected_version: u64,
        update: DerivedUpdate,
    ) -> CoreResult<CasOutcome>;
    async fn mark_card_issued(&self, session_id: Id) -> CoreResult<()>;

    async fn find_in_progress_session_for_meeting(
        &self,
        external_meeting_id: Id,
        participant_id: Id,
    ) -> CoreResult<Option<Session>>;
    async fn list_in_progress_sessions(&self) -> CoreResult<Vec<Session>>;
    async fn list_completed_unissued_sessions(&self) -> CoreResult<Vec<Session>>;

    // ---- Reference entities ----
    async fn get_participant(&self, id: Id) -> CoreResult<Option<Participant>>;
    async fn get_participant_by_email(&self, email: &str) -> CoreResult<Option<Participant>>;
    async fn put_participant(&self, participant: Participant) -> CoreResult<()>;
    /// Backs the officer dashboard's `GET /participants?status=...`.
    async fn list_participants(&self, active_only: Option<bool>) -> CoreResult<Vec<Participant>>;

    async fn get_officer(&self, id: Id) -> CoreResult<Option<Officer>>;
    async fn put_officer(&self, officer: Officer) -> CoreResult<()>;

    async fn get_external_meeting(&self, id: Id) -> CoreResult<Option<ExternalMeeting>>;
    async fn get_external_meeting_by_provider_id(
        &self,
        provider_meeting_id: &str,
    ) -> CoreResult<Option<ExternalMeeting>>;
    async fn put_external_meeting(&self, meeting: ExternalMeeting) -> CoreResult<()>;

    async fn get_active_requirement(&self, participant_id: Id) -> CoreResult<Option<Requirement>>;
    /// Deactivating the prior requirement is a precondition of activating a
    /// new one (spec §3 invariant); implementations enforce it atomically.
    async fn put_requirement(&self, requirement: Requirement) -> CoreResult<()>;

    // ---- Court cards & chain ----
    async fn put_card(&self, card: CourtCard) -> CoreResult<()>;
    async fn update_card_tampered(&self, card_id: Id, tampered: bool) -> CoreResult<()>;
    async fn get_card(&self, id: Id) -> CoreResult<Option<CourtCard>>;
    async fn get_card_by_number(&self, number: &str) -> CoreResult<Option<CourtCard>>;
    async fn get_card_by_session(&self, session_id: Id) -> CoreResult<Option<CourtCard>>;
    async fn get_cards_by_participant_email(&self, email: &str) -> CoreResult<Vec<CourtCard>>;
    async fn get_cards_by_case_number(&self, case_number: &str) -> CoreResult<Vec<CourtCard>>;
    /// Last card issued to this participant, ordered by `chain_position`.
    async fn get_last_card_for_participant(&self, participant_id: Id) -> CoreResult<Option<CourtCard>>;

    /// Atomically assign the next 3-digit per-(year,case) counter.
    async fn next_card_sequence(&self, year: i32, case_number: &str) -> CoreResult<u32>;
    /// Atomically assign the next per-participant chain position, 1-based.
    async fn next_chain_position(&self, participant_id: Id) -> CoreResult<u64>;

    // ---- Signatures (C6) ----
    /// Errors with `CoreError::state("SIGNATURE_EXISTS", ..)` if a
    /// signature already exists for (card_id, role) — at most one per pair.
    async fn put_signature(&self, signature: Signature) -> CoreResult<()>;
    async fn get_signatures(&self, card_id: Id) -> CoreResult<Vec<Signature>>;

    // ---- Digest batches (C8) ----
    async fn get_or_create_digest(
        &self,
        officer_id: Id,
        date: chrono::NaiveDate,
    ) -> CoreResult<DigestBatch>;
    async fn append_to_digest(&self, officer_id: Id, date: chrono::NaiveDate, session_id: Id) -> CoreResult<()>;
    async fn mark_digest_sent(&self, officer_id: Id, date: chrono::NaiveDate) -> CoreResult<bool>;
    async fn mark_digest_failed(&self, officer_id: Id, date: chrono::NaiveDate) -> CoreResult<()>;
    /// Every batch not yet `SENT`, for the scheduler's dispatch sweep.
    async fn list_pending_digests(&self) -> CoreResult<Vec<DigestBatch>>;

    // ---- Webcam snapshots ----
    async fn put_webcam_snapshot(&self, snapshot: WebcamSnapshot) -> CoreResult<()>;
    async fn list_webcam_snapshots(&self, session_id: Id) -> CoreResult<Vec<WebcamSnapshot>>;

    // ---- Requirement engine input ----
    async fn list_valid_cards_for_participant(&self, participant_id: Id) -> CoreResult<Vec<CourtCard>>;

    // ---- Scheduler leader election ----
    /// Attempt to (re-)acquire the process-wide finalizer leader lease.
    /// `holder_id` identifies this process; `lease_secs` is the lease
    /// duration (spec: 3x the tick period).
    async fn try_acquire_leader_lease(&self, holder_id: &str, lease_secs: i64) -> CoreResult<bool>;
}
