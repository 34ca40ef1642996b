//! Event Normalizer (component C2).
//!
//! Maps heterogeneous source events — provider webhooks, client
//! heartbeats, explicit join/leave API calls — onto the canonical
//! [`TimelineEvent`] shape and appends them to the Timeline Store.

use crate::config::PolicyConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::*;
use crate::store::{AppendOutcome, Store};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// A provider webhook event, already authenticated by the caller (HMAC
/// verification happens at the HTTP edge, not here).
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider_meeting_id: String,
    pub participant_email: String,
    pub kind: EventKind,
    /// Timestamp asserted by the provider, if any.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Present on LEFT events when the provider reports a cumulative
    /// session duration — authoritative over our own join/leave delta.
    pub provider_cumulative_duration_sec: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatEvent {
    pub session_id: Id,
    pub kind: EventKind,
    pub client_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ApiEvent {
    pub session_id: Id,
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct Normalizer<'a> {
    pub policy: &'a PolicyConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Normalizer { policy }
    }

    /// Applies the clock policy: trust `source_timestamp` if present and
    /// within ±10 minutes of `now`; otherwise stamp `now` and flag the
    /// event's data bag so downstream consumers know the timestamp is
    /// server-asserted, not source-asserted.
    fn resolve_timestamp(
        &self,
        source_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, bool) {
        match source_timestamp {
            Some(t) if (t - now).num_minutes().abs() <= 10 => (t, false),
            Some(_) => (now, true),
            None => (now, true),
        }
    }

    pub async fn normalize_webhook(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
        event: WebhookEvent,
    ) -> CoreResult<Option<(Id, AppendOutcome)>> {
        let participant = match store
            .get_participant_by_email(&event.participant_email)
            .await?
        {
            Some(p) => p,
            None => {
                warn!(email = %event.participant_email, "unknown participant on webhook — dropping");
                return Ok(None);
            }
        };

        let meeting = match store
            .get_external_meeting_by_provider_id(&event.provider_meeting_id)
            .await?
        {
            Some(m) => m,
            None => {
                warn!(
                    provider_meeting_id = %event.provider_meeting_id,
                    "unknown meeting on webhook — cannot normalize without a meeting record"
                );
                return Ok(None);
            }
        };

        let session = match store
            .find_in_progress_session_for_meeting(meeting.id, participant.id)
            .await?
        {
            Some(s) => s,
            None => {
                if event.kind != EventKind::Joined {
                    warn!(
                        participant = %participant.email,
                        "no IN_PROGRESS session for non-JOINED webhook event — dropping"
                    );
                    return Ok(None);
                }
                let requirement = store.get_active_requirement(participant.id).await?;
                if requirement.is_none() {
                    warn!(
                        participant = %participant.email,
                        "no active requirement — refusing to open a session from a bare webhook"
                    );
                    return Ok(None);
                }
                let officer_id = requirement.unwrap().officer_id;
                let (ts, _stamped) = self.resolve_timestamp(event.source_timestamp, now);
                let new_session = Session::new(Uuid::new_v4(), participant.id, officer_id, meeting.id, ts);
                store.create_session(new_session.clone()).await?;
                info!(session_id = %new_session.id, "created session from provider webhook JOINED");
                new_session
            }
        };

        let (ts, stamped) = self.resolve_timestamp(event.source_timestamp, now);
        let mut data = json!({});
        if stamped {
            data["clock_stamped"] = json!(true);
        }
        if let Some(dur) = event.provider_cumulative_duration_sec {
            if event.kind == EventKind::Left {
                data["provider_cumulative_duration_sec"] = json!(dur);
            }
        }

        let tl_event = TimelineEvent {
            seq: 0, // assigned by the store under the per-session writer lock
            t: ts,
            kind: event.kind,
            source: EventSource::Webhook,
            data,
        };
        let outcome = store.append_event(session.id, tl_event).await?;
        Ok(Some((session.id, outcome)))
    }

    pub async fn normalize_heartbeat(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
        event: HeartbeatEvent,
    ) -> CoreResult<Option<AppendOutcome>> {
        let session = match store.get_session(event.session_id).await? {
            Some(s) => s,
            None => {
                return Err(CoreError::validation(
                    "UNKNOWN_SESSION",
                    "heartbeat references a session that does not exist",
                ))
            }
        };

        if session.status != SessionStatus::InProgress {
            let late_window = Duration::minutes(10);
            let completed_at = session.last_event_time();
            if now - completed_at > late_window {
                warn!(
                    session_id = %session.id,
                    "late heartbeat outside the 10-minute post-completion window — dropping"
                );
                return Ok(None);
            }
        }

        let (ts, stamped) = self.resolve_timestamp(event.client_timestamp, now);
        let mut data = json!({});
        if stamped {
            data["clock_stamped"] = json!(true);
        }
        if session.status != SessionStatus::InProgress {
            data["late"] = json!(true);
        }

        let tl_event = TimelineEvent {
            seq: 0,
            t: ts,
            kind: event.kind,
            source: EventSource::Heartbeat,
            data,
        };
        let outcome = store.append_event(session.id, tl_event).await?;
        Ok(Some(outcome))
    }

    pub async fn normalize_api(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
        event: ApiEvent,
    ) -> CoreResult<AppendOutcome> {
        if store.get_session(event.session_id).await?.is_none() {
            return Err(CoreError::validation(
                "UNKNOWN_SESSION",
                "API call references a session that does not exist",
            ));
        }
        let (ts, stamped) = self.resolve_timestamp(event.timestamp, now);
        let mut data = json!({});
        if stamped {
            data["clock_stamped"] = json!(true);
        }
        let tl_event = TimelineEvent {
            seq: 0,
            t: ts,
            kind: event.kind,
            source: EventSource::Api,
            data,
        };
        store.append_event(event.session_id, tl_event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_timestamp_trusts_source_within_window() {
        let policy = PolicyConfig::default();
        let n = Normalizer::new(&policy);
        let now = Utc::now();
        let src = now - Duration::minutes(5);
        let (ts, stamped) = n.resolve_timestamp(Some(src), now);
        assert_eq!(ts, src);
        assert!(!stamped);
    }

    #[test]
    fn resolve_timestamp_rejects_source_outside_window() {
        let policy = PolicyConfig::default();
        let n = Normalizer::new(&policy);
        let now = Utc::now();
        let src = now - Duration::minutes(11);
        let (ts, stamped) = n.resolve_timestamp(Some(src), now);
        assert_eq!(ts, now);
        assert!(stamped);
    }

    #[test]
    fn resolve_timestamp_stamps_when_missing() {
        let policy = PolicyConfig::default();
        let n = Normalizer::new(&policy);
        let now = Utc::now();
        let (ts, stamped) = n.resolve_timestamp(None, now);
        assert_eq!(ts, now);
        assert!(stamped);
    }
}
