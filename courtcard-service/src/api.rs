//! HTTP API surface for the Court Card attendance service.
//!
//! Routing and handler shape follow `indexer::api::build_router`: a thin
//! Axum layer over `Arc<AppState>`, CORS wide open (this deployment has
//! no authenticated session concept beyond the signature credentials
//! checked per-request), JSON in and out.

use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use courtcard_core::error::CoreError;
use courtcard_core::model::*;
use courtcard_core::normalizer::{ApiEvent, Normalizer, WebhookEvent};
use courtcard_core::requirement;
use courtcard_core::signatures::{SignatureCollector, SignatureRequest};
use courtcard_core::store::{CasOutcome, DerivedUpdate};
use courtcard_core::verifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/session/join", post(join_session))
        .route("/session/leave", post(leave_session))
        .route("/session/leave-temp", post(leave_temp))
        .route("/session/rejoin", post(rejoin_session))
        .route("/session/activity", post(record_activity))
        .route("/card/{id}", get(verify_by_id_route))
        .route("/card/{id}/sign", post(sign_card))
        .route("/card/{id}/pdf", get(render_card))
        .route("/dashboard", get(dashboard))
        .route("/participants", get(list_participants))
        .route("/participants/{id}", get(get_participant))
        .route("/participants/{id}/requirement", post(set_requirement))
        .route("/webhook/provider", post(provider_webhook))
        .route("/verify/{card_id}", get(verify_by_id_route))
        .route("/verify/card-number/{number}", get(verify_by_number_route))
        .route("/verify/participant/{email}", get(verify_by_email_route))
        .route("/verify/case/{case_number}", get(verify_by_case_route))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

// ── Session lifecycle ───────────────────────────────────────────

#[derive(Deserialize)]
struct JoinSessionRequest {
    participant_email: String,
    external_meeting_id: Id,
}

#[derive(Serialize)]
struct JoinSessionResponse {
    session_id: Id,
}

async fn join_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinSessionRequest>,
) -> Result<Json<JoinSessionResponse>, ApiError> {
    let now = Utc::now();
    let participant = state
        .store
        .get_participant_by_email(&req.participant_email)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_PARTICIPANT", "no participant with that email"))?;
    let meeting = state
        .store
        .get_external_meeting(req.external_meeting_id)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_MEETING", "no meeting with that id"))?;

    let requirement = state
        .store
        .get_active_requirement(participant.id)
        .await?
        .ok_or_else(|| CoreError::validation("NO_ACTIVE_REQUIREMENT", "participant has no active requirement"))?;

    if state
        .store
        .find_in_progress_session_for_meeting(meeting.id, participant.id)
        .await?
        .is_some()
    {
        return Err(CoreError::state("SESSION_ALREADY_IN_PROGRESS", "a session is already in progress for this meeting").into());
    }

    let session = Session::new(uuid::Uuid::new_v4(), participant.id, requirement.officer_id, meeting.id, now);
    let session_id = session.id;
    state.store.create_session(session).await?;

    let normalizer = Normalizer::new(&state.policy);
    normalizer
        .normalize_api(
            state.store.as_ref(),
            now,
            ApiEvent { session_id, kind: EventKind::Joined, timestamp: Some(now) },
        )
        .await?;

    Ok(Json(JoinSessionResponse { session_id }))
}

#[derive(Deserialize)]
struct SessionIdRequest {
    session_id: Id,
}

#[derive(Serialize)]
struct SessionStatusResponse {
    session_id: Id,
    status: &'static str,
}

async fn leave_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionIdRequest>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let now = Utc::now();
    let session = state
        .store
        .get_session(req.session_id)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_SESSION", "no session with that id"))?;
    if session.status != SessionStatus::InProgress {
        return Err(CoreError::state("SESSION_NOT_IN_PROGRESS", "session is not in progress").into());
    }

    let normalizer = Normalizer::new(&state.policy);
    normalizer
        .normalize_api(
            state.store.as_ref(),
            now,
            ApiEvent { session_id: req.session_id, kind: EventKind::Left, timestamp: Some(now) },
        )
        .await?;

    let update = DerivedUpdate {
        totals: session.totals.clone(),
        attendance_pct: session.attendance_pct,
        verification_method: session.verification_method,
        status: SessionStatus::Completed,
        leave_time: Some(now),
        is_valid: session.is_valid,
    };
    match state.store.update_derived(req.session_id, session.version, update).await? {
        CasOutcome::Applied(_) => {}
        CasOutcome::Conflict => return Err(CoreError::transient("lost the session CAS race while leaving").into()),
    }

    Ok(Json(SessionStatusResponse { session_id: req.session_id, status: "COMPLETED" }))
}

#[derive(Deserialize)]
struct LeaveTempRequest {
    session_id: Id,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

/// A temporary away-period: the participant is reported as having left,
/// but the session stays `IN_PROGRESS` — the Reconciler's away-period
/// pairing picks this up on the next JOINED event or the stale sweep.
async fn leave_temp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaveTempRequest>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let now = Utc::now();
    let normalizer = Normalizer::new(&state.policy);
    normalizer
        .normalize_api(
            state.store.as_ref(),
            now,
            ApiEvent { session_id: req.session_id, kind: EventKind::Left, timestamp: Some(now) },
        )
        .await?;
    Ok(Json(SessionStatusResponse { session_id: req.session_id, status: "IN_PROGRESS" }))
}

async fn rejoin_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionIdRequest>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let now = Utc::now();
    let session = state
        .store
        .get_session(req.session_id)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_SESSION", "no session with that id"))?;
    if session.status != SessionStatus::InProgress {
        return Err(CoreError::state("SESSION_NOT_IN_PROGRESS", "cannot rejoin a session that has already completed").into());
    }

    let normalizer = Normalizer::new(&state.policy);
    normalizer
        .normalize_api(
            state.store.as_ref(),
            now,
            ApiEvent { session_id: req.session_id, kind: EventKind::Joined, timestamp: Some(now) },
        )
        .await?;
    Ok(Json(SessionStatusResponse { session_id: req.session_id, status: "IN_PROGRESS" }))
}

#[derive(Deserialize)]
struct ActivityRequest {
    session_id: Id,
    kind: EventKind,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

async fn record_activity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActivityRequest>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let now = Utc::now();
    let normalizer = Normalizer::new(&state.policy);
    normalizer
        .normalize_api(
            state.store.as_ref(),
            now,
            ApiEvent { session_id: req.session_id, kind: req.kind, timestamp: req.timestamp },
        )
        .await?;
    Ok(Json(SessionStatusResponse { session_id: req.session_id, status: "IN_PROGRESS" }))
}

// ── Cards ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SignCardRequest {
    role: SignerRole,
    method: AuthMethod,
    #[serde(default)]
    signer_id: Option<Id>,
    signer_name: String,
    signer_email: String,
    credential: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
}

#[derive(Serialize)]
struct SignCardResponse {
    signature_id: Id,
    fully_signed: bool,
}

async fn sign_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Id>,
    Json(req): Json<SignCardRequest>,
) -> Result<Json<SignCardResponse>, ApiError> {
    let now = Utc::now();
    let collector = SignatureCollector {
        password_verifier: state.password_verifier.as_ref(),
        nonce_store: state.nonce_store.as_ref(),
        participant_key: &state.participant_signing_key,
        host_key: &state.host_signing_key,
        policy: &state.policy,
    };
    let (signature, fully_signed) = collector
        .collect(
            state.store.as_ref(),
            SignatureRequest {
                card_id: id,
                role: req.role,
                method: req.method,
                signer_id: req.signer_id,
                signer_name: req.signer_name,
                signer_email: req.signer_email,
                credential: req.credential,
                ip: req.ip,
                user_agent: req.user_agent,
            },
            now,
        )
        .await?;
    Ok(Json(SignCardResponse { signature_id: signature.id, fully_signed }))
}

async fn render_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Id>,
) -> Result<axum::response::Response, ApiError> {
    use axum::http::header;
    use axum::response::IntoResponse;

    // Force the lazy integrity check and fetch the (possibly updated) card.
    verifier::verify_by_id(state.store.as_ref(), id)
        .await?
        .ok_or_else(|| CoreError::validation("CARD_NOT_FOUND", "no card with that id"))?;
    let card = state
        .store
        .get_card(id)
        .await?
        .ok_or_else(|| CoreError::validation("CARD_NOT_FOUND", "no card with that id"))?;

    let bytes = state
        .card_renderer
        .render(&card)
        .await
        .map_err(|message| CoreError::DataBug { message })?;
    Ok((
        [(header::CONTENT_TYPE, state.card_renderer.content_type())],
        bytes,
    )
        .into_response())
}

// ── Officer dashboard / participants ────────────────────────────

#[derive(Serialize)]
struct DashboardResponse {
    in_progress_sessions: usize,
    completed_unissued_sessions: usize,
}

async fn dashboard(State(state): State<Arc<AppState>>) -> Result<Json<DashboardResponse>, ApiError> {
    let in_progress = state.store.list_in_progress_sessions().await?.len();
    let completed_unissued = state.store.list_completed_unissued_sessions().await?.len();
    Ok(Json(DashboardResponse {
        in_progress_sessions: in_progress,
        completed_unissued_sessions: completed_unissued,
    }))
}

#[derive(Deserialize)]
struct ParticipantListQuery {
    status: Option<String>,
}

async fn list_participants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ParticipantListQuery>,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let active_only = match query.status.as_deref() {
        Some("active") => Some(true),
        Some("inactive") => Some(false),
        _ => None,
    };
    Ok(Json(state.store.list_participants(active_only).await?))
}

async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Id>,
) -> Result<Json<Participant>, ApiError> {
    let participant = state
        .store
        .get_participant(id)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_PARTICIPANT", "no participant with that id"))?;
    Ok(Json(participant))
}

#[derive(Deserialize)]
struct SetRequirementRequest {
    officer_id: Id,
    #[serde(default)]
    total_meetings_required: u32,
    #[serde(default)]
    meetings_per_week: u32,
    #[serde(default)]
    required_programs: Vec<String>,
    #[serde(default)]
    minimum_duration_min: u32,
    #[serde(default)]
    minimum_attendance_pct: f64,
}

#[derive(Serialize)]
struct RequirementResponse {
    requirement_id: Id,
    compliance: ComplianceStatus,
    valid_count: u32,
    required: u32,
}

async fn set_requirement(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<Id>,
    Json(req): Json<SetRequirementRequest>,
) -> Result<Json<RequirementResponse>, ApiError> {
    let now = Utc::now();
    let participant = state
        .store
        .get_participant(participant_id)
        .await?
        .ok_or_else(|| CoreError::validation("UNKNOWN_PARTICIPANT", "no participant with that id"))?;

    let requirement = Requirement {
        id: uuid::Uuid::new_v4(),
        participant_id,
        officer_id: req.officer_id,
        total_meetings_required: req.total_meetings_required,
        meetings_per_week: req.meetings_per_week,
        required_programs: req.required_programs,
        minimum_duration_min: req.minimum_duration_min,
        minimum_attendance_pct: req.minimum_attendance_pct,
        active: true,
        created_at: now,
    };
    let requirement_id = requirement.id;
    state.store.put_requirement(requirement.clone()).await?;

    let cards = state.store.list_valid_cards_for_participant(participant_id).await?;
    let report = requirement::evaluate(&requirement, &cards, now, participant.timezone.as_deref());

    Ok(Json(RequirementResponse {
        requirement_id,
        compliance: report.status,
        valid_count: report.valid_count,
        required: report.required,
    }))
}

// ── Provider webhook ─────────────────────────────────────────────

#[derive(Deserialize)]
struct ProviderWebhookRequest {
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    event: Option<EventKind>,
    #[serde(default)]
    provider_meeting_id: Option<String>,
    #[serde(default)]
    participant_email: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    provider_cumulative_duration_sec: Option<i64>,
}

#[derive(Serialize)]
struct ChallengeResponse {
    response: String,
}

#[derive(Serialize)]
struct WebhookAck {
    accepted: bool,
}

/// Answers the provider's URL-validation handshake by echoing an
/// HMAC-SHA-256 of the challenge token; otherwise verifies the event
/// signature and dispatches through the Normalizer.
async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProviderWebhookRequest>,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    if let Some(challenge) = req.challenge {
        let response = state.provider_client.sign(&challenge).await;
        return Ok(Json(ChallengeResponse { response }).into_response());
    }

    let signature = req
        .signature
        .ok_or_else(|| CoreError::validation("MISSING_SIGNATURE", "webhook event carries no signature"))?;
    let provider_meeting_id = req
        .provider_meeting_id
        .ok_or_else(|| CoreError::validation("MISSING_MEETING_ID", "webhook event carries no provider_meeting_id"))?;
    let event_kind = req
        .event
        .ok_or_else(|| CoreError::validation("MISSING_EVENT", "webhook event carries no event kind"))?;
    let participant_email = req
        .participant_email
        .ok_or_else(|| CoreError::validation("MISSING_PARTICIPANT", "webhook event carries no participant_email"))?;

    let signed_payload = format!("{}:{:?}:{}", provider_meeting_id, event_kind, participant_email);
    if !state.provider_client.verify(&signed_payload, &signature).await {
        return Err(CoreError::auth("INVALID_SIGNATURE", "webhook signature does not verify").into());
    }

    let now = Utc::now();
    let normalizer = Normalizer::new(&state.policy);
    let outcome = normalizer
        .normalize_webhook(
            state.store.as_ref(),
            now,
            WebhookEvent {
                provider_meeting_id,
                participant_email,
                kind: event_kind,
                source_timestamp: req.timestamp,
                provider_cumulative_duration_sec: req.provider_cumulative_duration_sec,
            },
        )
        .await?;

    Ok(Json(WebhookAck { accepted: outcome.is_some() }).into_response())
}

// ── Public verification ─────────────────────────────────────────

async fn verify_by_id_route(
    State(state): State<Arc<AppState>>,
    Path(card_id): Path<Id>,
) -> Result<Json<verifier::VerificationResult>, ApiError> {
    let result = verifier::verify_by_id(state.store.as_ref(), card_id)
        .await?
        .ok_or_else(|| CoreError::validation("CARD_NOT_FOUND", "no card with that id"))?;
    Ok(Json(result))
}

async fn verify_by_number_route(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<Json<verifier::VerificationResult>, ApiError> {
    let result = verifier::verify_by_number(state.store.as_ref(), &number)
        .await?
        .ok_or_else(|| CoreError::validation("CARD_NOT_FOUND", "no card with that number"))?;
    Ok(Json(result))
}

async fn verify_by_email_route(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<verifier::ParticipantSummary>, ApiError> {
    Ok(Json(verifier::verify_by_email(state.store.as_ref(), &email).await?))
}

async fn verify_by_case_route(
    State(state): State<Arc<AppState>>,
    Path(case_number): Path<String>,
) -> Result<Json<Vec<verifier::VerificationResult>>, ApiError> {
    Ok(Json(verifier::verify_by_case_number(state.store.as_ref(), &case_number).await?))
}

// ── Health ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
