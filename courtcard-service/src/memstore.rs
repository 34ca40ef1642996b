//! Reference in-memory `Store` implementation.
//!
//! `tokio::sync::RwLock`-guarded maps, one per entity kind, mirroring the
//! teacher's `Mutex`-guarded `HashMap`/`Vec` fields on `EventProcessor`.
//! CAS on `update_derived` compares the caller's `expected_version`
//! against the stored `Session.version` and only applies on a match.
//! Good enough for tests and a single-process deployment; a real
//! transactional store is a drop-in replacement behind the same trait.

use async_trait::async_trait;
use courtcard_core::error::{CoreError, CoreResult};
use courtcard_core::model::*;
use courtcard_core::store::{AppendOutcome, CasOutcome, DerivedUpdate, Store};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<Id, Session>>,
    participants: RwLock<HashMap<Id, Participant>>,
    participants_by_email: RwLock<HashMap<String, Id>>,
    officers: RwLock<HashMap<Id, Officer>>,
    meetings: RwLock<HashMap<Id, ExternalMeeting>>,
    meetings_by_provider_id: RwLock<HashMap<String, Id>>,
    requirements: RwLock<HashMap<Id, Requirement>>,
    active_requirement_by_participant: RwLock<HashMap<Id, Id>>,
    cards: RwLock<HashMap<Id, CourtCard>>,
    card_by_session: RwLock<HashMap<Id, Id>>,
    card_chain_by_participant: RwLock<HashMap<Id, Vec<Id>>>,
    card_sequence: RwLock<HashMap<(i32, String), u32>>,
    chain_position_counter: RwLock<HashMap<Id, u64>>,
    signatures: RwLock<HashMap<(Id, SignerRole), Signature>>,
    digests: RwLock<HashMap<(Id, chrono::NaiveDate), DigestBatch>>,
    webcam_snapshots: RwLock<HashMap<Id, Vec<WebcamSnapshot>>>,
    leader_lease: RwLock<Option<(String, chrono::DateTime<chrono::Utc>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    // ---- Sessions / timeline ----

    async fn create_session(&self, session: Session) -> CoreResult<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Id) -> CoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn append_event(&self, session_id: Id, mut event: TimelineEvent) -> CoreResult<AppendOutcome> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::validation("UNKNOWN_SESSION", "session does not exist"))?;

        let key = (event.source, event.kind, event.t.timestamp());
        if session.timeline.iter().any(|e| e.dedup_key() == key) {
            return Ok(AppendOutcome::Duplicate);
        }
        event.seq = session.timeline.len() as u64 + 1;
        session.timeline.push(event);
        Ok(AppendOutcome::Accepted)
    }

    async fn read_timeline(&self, session_id: Id) -> CoreResult<Vec<TimelineEvent>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .map(|s| s.timeline.clone())
            .unwrap_or_default())
    }

    async fn update_derived(
        &self,
        session_id: Id,
        expected_version: u64,
        update: DerivedUpdate,
    ) -> CoreResult<CasOutcome> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::validation("UNKNOWN_SESSION", "session does not exist"))?;
        if session.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        session.totals = update.totals;
        session.attendance_pct = update.attendance_pct;
        session.verification_method = update.verification_method;
        session.status = update.status;
        session.leave_time = update.leave_time;
        session.is_valid = update.is_valid;
        session.version += 1;
        Ok(CasOutcome::Applied(session.version))
    }

    async fn mark_card_issued(&self, session_id: Id) -> CoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.card_issued = true;
        }
        Ok(())
    }

    async fn find_in_progress_session_for_meeting(
        &self,
        external_meeting_id: Id,
        participant_id: Id,
    ) -> CoreResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| {
                s.external_meeting_id == external_meeting_id
                    && s.participant_id == participant_id
                    && s.status == SessionStatus::InProgress
            })
            .max_by_key(|s| s.join_time)
            .cloned())
    }

    async fn list_in_progress_sessions(&self) -> CoreResult<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn list_completed_unissued_sessions(&self) -> CoreResult<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::Completed && !s.card_issued)
            .cloned()
            .collect())
    }

    // ---- Reference entities ----

    async fn get_participant(&self, id: Id) -> CoreResult<Option<Participant>> {
        Ok(self.participants.read().await.get(&id).cloned())
    }

    async fn get_participant_by_email(&self, email: &str) -> CoreResult<Option<Participant>> {
        let email = email.to_ascii_lowercase();
        let Some(id) = self.participants_by_email.read().await.get(&email).copied() else {
            return Ok(None);
        };
        Ok(self.participants.read().await.get(&id).cloned())
    }

    async fn put_participant(&self, participant: Participant) -> CoreResult<()> {
        let email = participant.email.to_ascii_lowercase();
        self.participants_by_email.write().await.insert(email, participant.id);
        self.participants.write().await.insert(participant.id, participant);
        Ok(())
    }

    async fn list_participants(&self, active_only: Option<bool>) -> CoreResult<Vec<Participant>> {
        Ok(self
            .participants
            .read()
            .await
            .values()
            .filter(|p| active_only.map(|want_active| p.is_active == want_active).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_officer(&self, id: Id) -> CoreResult<Option<Officer>> {
        Ok(self.officers.read().await.get(&id).cloned())
    }

    async fn put_officer(&self, officer: Officer) -> CoreResult<()> {
        self.officers.write().await.insert(officer.id, officer);
        Ok(())
    }

    async fn get_external_meeting(&self, id: Id) -> CoreResult<Option<ExternalMeeting>> {
        Ok(self.meetings.read().await.get(&id).cloned())
    }

    async fn get_external_meeting_by_provider_id(
        &self,
        provider_meeting_id: &str,
    ) -> CoreResult<Option<ExternalMeeting>> {
        let Some(id) = self
            .meetings_by_provider_id
            .read()
            .await
            .get(provider_meeting_id)
            .copied()
        else {
            return Ok(None);
        };
        Ok(self.meetings.read().await.get(&id).cloned())
    }

    async fn put_external_meeting(&self, meeting: ExternalMeeting) -> CoreResult<()> {
        self.meetings_by_provider_id
            .write()
            .await
            .insert(meeting.provider_meeting_id.clone(), meeting.id);
        self.meetings.write().await.insert(meeting.id, meeting);
        Ok(())
    }

    async fn get_active_requirement(&self, participant_id: Id) -> CoreResult<Option<Requirement>> {
        let Some(req_id) = self
            .active_requirement_by_participant
            .read()
            .await
            .get(&participant_id)
            .copied()
        else {
            return Ok(None);
        };
        Ok(self.requirements.read().await.get(&req_id).cloned())
    }

    async fn put_requirement(&self, requirement: Requirement) -> CoreResult<()> {
        if requirement.active {
            let mut requirements = self.requirements.write().await;
            let mut active_by_participant = self.active_requirement_by_participant.write().await;
            if let Some(prior_id) = active_by_participant.get(&requirement.participant_id).copied() {
                if let Some(prior) = requirements.get_mut(&prior_id) {
                    prior.active = false;
                }
            }
            active_by_participant.insert(requirement.participant_id, requirement.id);
            requirements.insert(requirement.id, requirement);
        } else {
            self.requirements.write().await.insert(requirement.id, requirement);
        }
        Ok(())
    }

    // ---- Court cards & chain ----

    async fn put_card(&self, card: CourtCard) -> CoreResult<()> {
        let session = self.sessions.read().await.get(&card.session_id).cloned();
        let participant_id = session.map(|s| s.participant_id);

        self.card_by_session.write().await.insert(card.session_id, card.id);
        if let Some(participant_id) = participant_id {
            let mut chain = self.card_chain_by_participant.write().await;
            chain.entry(participant_id).or_default().push(card.id);
        }
        self.cards.write().await.insert(card.id, card);
        Ok(())
    }

    async fn update_card_tampered(&self, card_id: Id, tampered: bool) -> CoreResult<()> {
        if let Some(card) = self.cards.write().await.get_mut(&card_id) {
            card.tampered = tampered;
        }
        Ok(())
    }

    async fn get_card(&self, id: Id) -> CoreResult<Option<CourtCard>> {
        Ok(self.cards.read().await.get(&id).cloned())
    }

    async fn get_card_by_number(&self, number: &str) -> CoreResult<Option<CourtCard>> {
        Ok(self.cards.read().await.values().find(|c| c.number == number).cloned())
    }

    async fn get_card_by_session(&self, session_id: Id) -> CoreResult<Option<CourtCard>> {
        let Some(card_id) = self.card_by_session.read().await.get(&session_id).copied() else {
            return Ok(None);
        };
        Ok(self.cards.read().await.get(&card_id).cloned())
    }

    async fn get_cards_by_participant_email(&self, email: &str) -> CoreResult<Vec<CourtCard>> {
        let email = email.to_ascii_lowercase();
        Ok(self
            .cards
            .read()
            .await
            .values()
            .filter(|c| c.participant_snapshot.email.to_ascii_lowercase() == email)
            .cloned()
            .collect())
    }

    async fn get_cards_by_case_number(&self, case_number: &str) -> CoreResult<Vec<CourtCard>> {
        Ok(self
            .cards
            .read()
            .await
            .values()
            .filter(|c| c.participant_snapshot.case_number == case_number)
            .cloned()
            .collect())
    }

    async fn get_last_card_for_participant(&self, participant_id: Id) -> CoreResult<Option<CourtCard>> {
        let chain = self.card_chain_by_participant.read().await;
        let Some(last_id) = chain.get(&participant_id).and_then(|ids| ids.last()).copied() else {
            return Ok(None);
        };
        Ok(self.cards.read().await.get(&last_id).cloned())
    }

    async fn next_card_sequence(&self, year: i32, case_number: &str) -> CoreResult<u32> {
        let mut counters = self.card_sequence.write().await;
        let counter = counters.entry((year, case_number.to_string())).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn next_chain_position(&self, participant_id: Id) -> CoreResult<u64> {
        let mut counters = self.chain_position_counter.write().await;
        let counter = counters.entry(participant_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    // ---- Signatures ----

    async fn put_signature(&self, signature: Signature) -> CoreResult<()> {
        let mut signatures = self.signatures.write().await;
        let key = (signature.card_id, signature.signer_role);
        if signatures.contains_key(&key) {
            return Err(CoreError::state(
                "SIGNATURE_EXISTS",
                "a signature for this card and role already exists",
            ));
        }
        signatures.insert(key, signature);
        Ok(())
    }

    async fn get_signatures(&self, card_id: Id) -> CoreResult<Vec<Signature>> {
        Ok(self
            .signatures
            .read()
            .await
            .values()
            .filter(|s| s.card_id == card_id)
            .cloned()
            .collect())
    }

    // ---- Digest batches ----

    async fn get_or_create_digest(
        &self,
        officer_id: Id,
        date: chrono::NaiveDate,
    ) -> CoreResult<DigestBatch> {
        let mut digests = self.digests.write().await;
        let key = (officer_id, date);
        if let Some(existing) = digests.get(&key) {
            return Ok(existing.clone());
        }
        let batch = DigestBatch {
            id: uuid::Uuid::new_v4(),
            officer_id,
            date,
            session_ids: Vec::new(),
            status: DigestStatus::Pending,
            sent_at: None,
            attempts: 0,
        };
        digests.insert(key, batch.clone());
        Ok(batch)
    }

    async fn append_to_digest(&self, officer_id: Id, date: chrono::NaiveDate, session_id: Id) -> CoreResult<()> {
        let mut digests = self.digests.write().await;
        let key = (officer_id, date);
        let batch = digests.entry(key).or_insert_with(|| DigestBatch {
            id: uuid::Uuid::new_v4(),
            officer_id,
            date,
            session_ids: Vec::new(),
            status: DigestStatus::Pending,
            sent_at: None,
            attempts: 0,
        });
        if !batch.session_ids.contains(&session_id) {
            batch.session_ids.push(session_id);
        }
        Ok(())
    }

    async fn mark_digest_sent(&self, officer_id: Id, date: chrono::NaiveDate) -> CoreResult<bool> {
        let mut digests = self.digests.write().await;
        let Some(batch) = digests.get_mut(&(officer_id, date)) else {
            return Ok(false);
        };
        if batch.status == DigestStatus::Sent {
            return Ok(false);
        }
        batch.status = DigestStatus::Sent;
        batch.sent_at = Some(chrono::Utc::now());
        Ok(true)
    }

    async fn mark_digest_failed(&self, officer_id: Id, date: chrono::NaiveDate) -> CoreResult<()> {
        if let Some(batch) = self.digests.write().await.get_mut(&(officer_id, date)) {
            if batch.status != DigestStatus::Sent {
                batch.status = DigestStatus::Failed;
                batch.attempts += 1;
            }
        }
        Ok(())
    }

    async fn list_pending_digests(&self) -> CoreResult<Vec<DigestBatch>> {
        Ok(self
            .digests
            .read()
            .await
            .values()
            .filter(|b| b.status != DigestStatus::Sent)
            .cloned()
            .collect())
    }

    // ---- Webcam snapshots ----

    async fn put_webcam_snapshot(&self, snapshot: WebcamSnapshot) -> CoreResult<()> {
        self.webcam_snapshots
            .write()
            .await
            .entry(snapshot.session_id)
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn list_webcam_snapshots(&self, session_id: Id) -> CoreResult<Vec<WebcamSnapshot>> {
        Ok(self
            .webcam_snapshots
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    // ---- Requirement engine input ----

    async fn list_valid_cards_for_participant(&self, participant_id: Id) -> CoreResult<Vec<CourtCard>> {
        let chain = self.card_chain_by_participant.read().await;
        let Some(ids) = chain.get(&participant_id) else {
            return Ok(Vec::new());
        };
        let cards = self.cards.read().await;
        Ok(ids.iter().filter_map(|id| cards.get(id).cloned()).collect())
    }

    // ---- Scheduler leader election ----

    async fn try_acquire_leader_lease(&self, holder_id: &str, lease_secs: i64) -> CoreResult<bool> {
        let mut lease = self.leader_lease.write().await;
        let now = chrono::Utc::now();
        let acquired = match lease.as_ref() {
            Some((current_holder, expires_at)) => current_holder == holder_id || *expires_at <= now,
            None => true,
        };
        if acquired {
            *lease = Some((holder_id.to_string(), now + chrono::Duration::seconds(lease_secs)));
        }
        Ok(acquired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_session() -> Session {
        Session::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    #[tokio::test]
    async fn append_event_deduplicates() {
        let store = InMemoryStore::new();
        let session = sample_session();
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let event = TimelineEvent {
            seq: 0,
            t: Utc::now(),
            kind: EventKind::Joined,
            source: EventSource::Webhook,
            data: json!({}),
        };
        let first = store.append_event(session_id, event.clone()).await.unwrap();
        let second = store.append_event(session_id, event).await.unwrap();
        assert_eq!(first, AppendOutcome::Accepted);
        assert_eq!(second, AppendOutcome::Duplicate);
    }

    #[tokio::test]
    async fn update_derived_rejects_stale_version() {
        let store = InMemoryStore::new();
        let session = sample_session();
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let update = DerivedUpdate {
            totals: SessionTotals::default(),
            attendance_pct: 100.0,
            verification_method: VerificationMethod::Webhook,
            status: SessionStatus::Completed,
            leave_time: Some(Utc::now()),
            is_valid: Some(true),
        };
        let outcome = store.update_derived(session_id, 5, update).await.unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
    }

    #[tokio::test]
    async fn card_sequence_increments_per_year_and_case() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_card_sequence(2026, "CR-1").await.unwrap(), 1);
        assert_eq!(store.next_card_sequence(2026, "CR-1").await.unwrap(), 2);
        assert_eq!(store.next_card_sequence(2026, "CR-2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn signature_uniqueness_per_card_and_role() {
        let store = InMemoryStore::new();
        let card_id = Uuid::new_v4();
        let sig = Signature {
            id: Uuid::new_v4(),
            card_id,
            signer_role: SignerRole::Participant,
            signer_id: None,
            signer_name: "A".into(),
            signer_email: "a@example.com".into(),
            auth_method: AuthMethod::Password,
            timestamp: Utc::now(),
            signature_bytes: vec![],
            public_key_fingerprint: "f".into(),
            ip: None,
            user_agent: None,
        };
        store.put_signature(sig.clone()).await.unwrap();
        let err = store.put_signature(sig).await.unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_EXISTS");
    }

    #[tokio::test]
    async fn leader_lease_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        assert!(store.try_acquire_leader_lease("a", 60).await.unwrap());
        assert!(!store.try_acquire_leader_lease("b", 60).await.unwrap());
        assert!(store.try_acquire_leader_lease("a", 60).await.unwrap());
    }
}
