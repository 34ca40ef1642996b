//! Verifier (component C9).
//!
//! Read-only, unauthenticated lookups by card id, card number,
//! participant email, or case number. Every read recomputes the hash and
//! lazily updates `tampered` if it no longer matches — tampering is
//! non-recoverable at the card layer, so this only ever flips the flag
//! from false to true, never back.

use crate::error::CoreResult;
use crate::issuer::recompute_hash;
use crate::model::{CourtCard, Id, Signature};
use crate::store::Store;
use serde::Serialize;

/// What a verification lookup returns: everything a relying party needs
/// to trust the card, nothing that would expose participant credentials
/// or the raw session timeline.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub card_id: Id,
    pub number: String,
    pub participant_snapshot: crate::model::ParticipantSnapshot,
    pub officer_snapshot: crate::model::OfficerSnapshot,
    pub meeting_snapshot: crate::model::MeetingSnapshot,
    pub metrics: crate::model::CardMetrics,
    pub verdict: crate::model::Verdict,
    pub violations: Vec<crate::model::Violation>,
    pub chain_position: u64,
    pub prev_hash: String,
    pub hash: String,
    pub tampered: bool,
    pub signatures: Vec<SignatureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureSummary {
    pub role: crate::model::SignerRole,
    pub signer_name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub participant_email: String,
    pub cards: Vec<VerificationResult>,
}

fn summarize_signatures(signatures: Vec<Signature>) -> Vec<SignatureSummary> {
    signatures
        .into_iter()
        .map(|s| SignatureSummary {
            role: s.signer_role,
            signer_name: s.signer_name,
            timestamp: s.timestamp,
        })
        .collect()
}

/// Perform the integrity check on a card and persist `tampered=true` if
/// it fails. Returns the (possibly updated) card.
async fn check_integrity(store: &dyn Store, mut card: CourtCard) -> CoreResult<CourtCard> {
    if !card.tampered {
        let recomputed = recompute_hash(&card);
        if recomputed != card.hash {
            card.tampered = true;
            store.update_card_tampered(card.id, true).await?;
        }
    }
    Ok(card)
}

async fn to_result(store: &dyn Store, card: CourtCard) -> CoreResult<VerificationResult> {
    let card = check_integrity(store, card).await?;
    let signatures = store.get_signatures(card.id).await?;
    Ok(VerificationResult {
        card_id: card.id,
        number: card.number,
        participant_snapshot: card.participant_snapshot,
        officer_snapshot: card.officer_snapshot,
        meeting_snapshot: card.meeting_snapshot,
        metrics: card.metrics,
        verdict: card.verdict,
        violations: card.violations,
        chain_position: card.chain_position,
        prev_hash: card.prev_hash,
        hash: card.hash,
        tampered: card.tampered,
        signatures: summarize_signatures(signatures),
    })
}

pub async fn verify_by_id(store: &dyn Store, card_id: Id) -> CoreResult<Option<VerificationResult>> {
    match store.get_card(card_id).await? {
        Some(card) => Ok(Some(to_result(store, card).await?)),
        None => Ok(None),
    }
}

pub async fn verify_by_number(store: &dyn Store, number: &str) -> CoreResult<Option<VerificationResult>> {
    match store.get_card_by_number(number).await? {
        Some(card) => Ok(Some(to_result(store, card).await?)),
        None => Ok(None),
    }
}

pub async fn verify_by_email(store: &dyn Store, email: &str) -> CoreResult<ParticipantSummary> {
    let cards = store.get_cards_by_participant_email(email).await?;
    let mut results = Vec::with_capacity(cards.len());
    for card in cards {
        results.push(to_result(store, card).await?);
    }
    Ok(ParticipantSummary {
        participant_email: email.to_string(),
        cards: results,
    })
}

pub async fn verify_by_case_number(store: &dyn Store, case_number: &str) -> CoreResult<Vec<VerificationResult>> {
    let cards = store.get_cards_by_case_number(case_number).await?;
    let mut results = Vec::with_capacity(cards.len());
    for card in cards {
        results.push(to_result(store, card).await?);
    }
    Ok(results)
}
