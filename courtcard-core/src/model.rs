//! Domain entities for the Court Card attendance system.
//!
//! Mirrors the entity set of the design's data model section: identifiers
//! are `Uuid`, times are UTC to millisecond precision. These types carry no
//! storage-engine behavior — they are persisted and loaded through
//! [`crate::store::Store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type Id = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub case_number: String,
    pub supervising_officer_id: Option<Id>,
    pub is_active: bool,
    pub timezone: Option<String>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Officer {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub badge: String,
    pub organization: String,
    pub is_active: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Id,
    pub participant_id: Id,
    pub officer_id: Id,
    pub total_meetings_required: u32,
    pub meetings_per_week: u32,
    pub required_programs: Vec<String>,
    pub minimum_duration_min: u32,
    pub minimum_attendance_pct: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMeeting {
    pub id: Id,
    pub provider_meeting_id: String,
    pub name: String,
    pub program: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_duration_min: u32,
    pub timezone: String,
    pub join_url: String,
    pub passcode: Option<String>,
    pub tags: Vec<String>,
}

impl ExternalMeeting {
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_start + chrono::Duration::minutes(self.scheduled_duration_min as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Abandoned => "ABANDONED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationMethod {
    Webhook,
    Heartbeat,
    Both,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSource {
    Webhook,
    Heartbeat,
    Api,
}

impl EventSource {
    /// Tie-break priority used by the reconciler: WEBHOOK > API > HEARTBEAT.
    pub fn priority(&self) -> u8 {
        match self {
            EventSource::Webhook => 2,
            EventSource::Api => 1,
            EventSource::Heartbeat => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Joined,
    Left,
    VideoOn,
    VideoOff,
    Active,
    Idle,
    Mouse,
    Keyboard,
    Scroll,
    Click,
}

impl EventKind {
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            EventKind::Mouse | EventKind::Keyboard | EventKind::Scroll | EventKind::Click
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub seq: u64,
    pub t: DateTime<Utc>,
    pub kind: EventKind,
    pub source: EventSource,
    pub data: serde_json::Value,
}

impl TimelineEvent {
    /// Duplicate-suppression key: (source, kind, t rounded to the second).
    /// The participant component of the key lives at the session level
    /// (one timeline per session, already scoped to one participant).
    pub fn dedup_key(&self) -> (EventSource, EventKind, i64) {
        (self.source, self.kind, self.t.timestamp())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_duration_min: f64,
    pub active_duration_min: f64,
    pub idle_duration_min: f64,
    pub video_on_duration_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Id,
    pub participant_id: Id,
    pub officer_id: Id,
    pub external_meeting_id: Id,
    pub join_time: DateTime<Utc>,
    pub leave_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub timeline: Vec<TimelineEvent>,
    pub totals: SessionTotals,
    pub attendance_pct: f64,
    pub verification_method: VerificationMethod,
    pub is_valid: Option<bool>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub card_issued: bool,
    pub version: u64,
}

impl Session {
    pub fn new(
        id: Id,
        participant_id: Id,
        officer_id: Id,
        external_meeting_id: Id,
        join_time: DateTime<Utc>,
    ) -> Self {
        Session {
            id,
            participant_id,
            officer_id,
            external_meeting_id,
            join_time,
            leave_time: None,
            status: SessionStatus::InProgress,
            timeline: Vec::new(),
            totals: SessionTotals::default(),
            attendance_pct: 0.0,
            verification_method: VerificationMethod::None,
            is_valid: None,
            metadata: BTreeMap::new(),
            card_issued: false,
            version: 0,
        }
    }

    pub fn last_event_time(&self) -> DateTime<Utc> {
        self.timeline
            .iter()
            .map(|e| e.t)
            .max()
            .unwrap_or(self.join_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub name: String,
    pub email: String,
    pub case_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficerSnapshot {
    pub name: String,
    pub email: String,
    pub badge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSnapshot {
    pub name: String,
    pub program: String,
    pub scheduled_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardMetrics {
    pub total_duration_min: f64,
    pub active_duration_min: f64,
    pub idle_duration_min: f64,
    pub video_on_duration_min: f64,
    pub attendance_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtCard {
    pub id: Id,
    pub session_id: Id,
    pub meeting_id: Id,
    pub join: DateTime<Utc>,
    pub leave: DateTime<Utc>,
    pub number: String,
    pub participant_snapshot: ParticipantSnapshot,
    pub officer_snapshot: OfficerSnapshot,
    pub meeting_snapshot: MeetingSnapshot,
    pub metrics: CardMetrics,
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    pub explanation: String,
    pub hash: String,
    pub prev_hash: String,
    pub chain_position: u64,
    pub verification_url: String,
    pub qr_payload: String,
    pub generated_at: DateTime<Utc>,
    pub tampered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignerRole {
    Participant,
    Host,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    Password,
    EmailLink,
    SystemGenerated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub id: Id,
    pub card_id: Id,
    pub signer_role: SignerRole,
    pub signer_id: Option<Id>,
    pub signer_name: String,
    pub signer_email: String,
    pub auth_method: AuthMethod,
    pub timestamp: DateTime<Utc>,
    pub signature_bytes: Vec<u8>,
    pub public_key_fingerprint: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebcamSnapshot {
    pub id: Id,
    pub session_id: Id,
    pub captured_at: DateTime<Utc>,
    pub minute_into_meeting: u32,
    pub blob_ref: String,
    pub face_detected: Option<bool>,
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DigestStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestBatch {
    pub id: Id,
    pub officer_id: Id,
    pub date: chrono::NaiveDate,
    pub session_ids: Vec<Id>,
    pub status: DigestStatus,
    pub sent_at: Option<DateTime<Utc>>,
    /// Failed dispatch attempts so far; the scheduler stops retrying past
    /// `MAX_DIGEST_SEND_RETRIES`.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    InProgress,
    NotStarted,
    AtRisk,
    NonCompliant,
}
