//! Signature Collector (component C6).
//!
//! Accepts PARTICIPANT and HOST signatures on an issued card, verifying
//! the claimed credential out-of-band (password or single-use email
//! nonce), then produces a compact Ed25519 signature over the card hash
//! and records it. SYSTEM signatures are never accepted from this path.

use crate::auth::{NonceStore, PasswordVerifier};
use crate::config::PolicyConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{AuthMethod, CourtCard, Id, Signature, SignerRole};
use crate::store::Store;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use uuid::Uuid;

/// A signing attempt as received at the HTTP edge.
pub struct SignatureRequest {
    pub card_id: Id,
    pub role: SignerRole,
    pub method: AuthMethod,
    pub signer_id: Option<Id>,
    pub signer_name: String,
    pub signer_email: String,
    /// The participant's password (PASSWORD), or the emailed nonce
    /// (EMAIL_LINK). Unused for SYSTEM_GENERATED, which this collector
    /// never accepts from user input.
    pub credential: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SignatureCollector<'a> {
    pub password_verifier: &'a dyn PasswordVerifier,
    pub nonce_store: &'a dyn NonceStore,
    /// Per-role Ed25519 signing keys. In production these are loaded from
    /// a secrets manager; tests and the in-memory service wiring generate
    /// them once at startup.
    pub participant_key: &'a SigningKey,
    pub host_key: &'a SigningKey,
    pub policy: &'a PolicyConfig,
}

/// A HOST signature is only accepted from an email domain on
/// `policy.approved_officer_domains`. An empty list means no domain
/// restriction is configured.
fn officer_domain_approved(policy: &PolicyConfig, email: &str) -> bool {
    if policy.approved_officer_domains.is_empty() {
        return true;
    }
    match email.rsplit_once('@') {
        Some((_, domain)) => policy
            .approved_officer_domains
            .iter()
            .any(|approved| approved.eq_ignore_ascii_case(domain)),
        None => false,
    }
}

impl<'a> SignatureCollector<'a> {
    async fn verify_credential(&self, req: &SignatureRequest, now: DateTime<Utc>) -> CoreResult<()> {
        match (req.role, req.method) {
            (SignerRole::Participant, AuthMethod::Password) => {
                let signer_id = req.signer_id.ok_or_else(|| {
                    CoreError::validation("MISSING_SIGNER_ID", "participant signature requires signer_id")
                })?;
                let ok = self.password_verifier.verify(signer_id, &req.credential).await?;
                if !ok {
                    return Err(CoreError::auth("INVALID_CREDENTIAL", "password did not match"));
                }
                Ok(())
            }
            (SignerRole::Host, AuthMethod::EmailLink) => {
                if !officer_domain_approved(self.policy, &req.signer_email) {
                    return Err(CoreError::auth(
                        "OFFICER_DOMAIN_NOT_APPROVED",
                        "officer email domain is not on the approved list",
                    ));
                }
                let ok = self
                    .nonce_store
                    .consume(req.card_id, &req.signer_email, &req.credential, now)
                    .await?;
                if !ok {
                    return Err(CoreError::auth("INVALID_CREDENTIAL", "email link nonce is invalid, expired, or already used"));
                }
                Ok(())
            }
            (SignerRole::System, _) => Err(CoreError::validation(
                "ROLE_NOT_ACCEPTED",
                "SYSTEM signatures are never accepted from user input",
            )),
            _ => Err(CoreError::validation(
                "METHOD_ROLE_MISMATCH",
                "auth method is not valid for the claimed signer role",
            )),
        }
    }

    fn signing_key_for(&self, role: SignerRole) -> CoreResult<&SigningKey> {
        match role {
            SignerRole::Participant => Ok(self.participant_key),
            SignerRole::Host => Ok(self.host_key),
            SignerRole::System => Err(CoreError::validation(
                "ROLE_NOT_ACCEPTED",
                "SYSTEM signatures are never accepted from user input",
            )),
        }
    }

    /// Accept a signature attempt against an already-issued card.
    /// Returns the full signature list for the card after insertion, plus
    /// whether this attempt completed the card (both roles now present).
    pub async fn collect(
        &self,
        store: &dyn Store,
        req: SignatureRequest,
        now: DateTime<Utc>,
    ) -> CoreResult<(Signature, bool)> {
        let card = store
            .get_card(req.card_id)
            .await?
            .ok_or_else(|| CoreError::validation("CARD_NOT_FOUND", "no card with that id"))?;

        if card.tampered {
            return Err(CoreError::state("STATE_INVALID", "card has failed its integrity check and cannot accept new signatures"));
        }

        self.verify_credential(&req, now).await?;

        let signing_key = self.signing_key_for(req.role)?;
        let signature_bytes = signing_key.sign(card.hash.as_bytes()).to_bytes().to_vec();
        let public_key_fingerprint = hex::encode(signing_key.verifying_key().to_bytes());

        let signature = Signature {
            id: Uuid::new_v4(),
            card_id: req.card_id,
            signer_role: req.role,
            signer_id: req.signer_id,
            signer_name: req.signer_name,
            signer_email: req.signer_email,
            auth_method: req.method,
            timestamp: now,
            signature_bytes,
            public_key_fingerprint,
            ip: req.ip,
            user_agent: req.user_agent,
        };

        // put_signature enforces uniqueness on (card_id, role).
        store.put_signature(signature.clone()).await?;

        let existing = store.get_signatures(req.card_id).await?;
        let fully_signed = is_fully_signed(&existing);
        if fully_signed {
            tracing::info!(card_id = %req.card_id, "card fully signed");
        }

        Ok((signature, fully_signed))
    }
}

/// A card is Fully Signed when both PARTICIPANT and HOST signatures
/// exist, regardless of order.
pub fn is_fully_signed(signatures: &[Signature]) -> bool {
    signatures.iter().any(|s| s.signer_role == SignerRole::Participant)
        && signatures.iter().any(|s| s.signer_role == SignerRole::Host)
}

#[allow(dead_code)]
fn verify_card_signature(card: &CourtCard, signature: &Signature, public_key_bytes: &[u8; 32]) -> bool {
    use ed25519_dalek::{Verifier, VerifyingKey};
    let Ok(key) = VerifyingKey::from_bytes(public_key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.signature_bytes.as_slice()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    key.verify(card.hash.as_bytes(), &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{InMemoryNonceStore, InMemoryPasswordVerifier};
    use rand::rngs::OsRng;

    fn test_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[test]
    fn fully_signed_requires_both_roles() {
        let base = |role| Signature {
            id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            signer_role: role,
            signer_id: None,
            signer_name: "x".into(),
            signer_email: "x@example.com".into(),
            auth_method: AuthMethod::SystemGenerated,
            timestamp: Utc::now(),
            signature_bytes: vec![],
            public_key_fingerprint: "f".into(),
            ip: None,
            user_agent: None,
        };
        assert!(!is_fully_signed(&[base(SignerRole::Participant)]));
        assert!(is_fully_signed(&[base(SignerRole::Participant), base(SignerRole::Host)]));
    }

    #[test]
    fn signature_roundtrips_through_verifying_key() {
        let key = test_key();
        let card_hash = "deadbeef";
        let sig = key.sign(card_hash.as_bytes());
        let vk = key.verifying_key();
        use ed25519_dalek::Verifier;
        assert!(vk.verify(card_hash.as_bytes(), &sig).is_ok());
    }

    #[tokio::test]
    async fn system_role_is_rejected() {
        let participant_key = test_key();
        let host_key = test_key();
        let passwords = InMemoryPasswordVerifier::new();
        let nonces = InMemoryNonceStore::new();
        let policy = PolicyConfig::default();
        let collector = SignatureCollector {
            password_verifier: &passwords,
            nonce_store: &nonces,
            participant_key: &participant_key,
            host_key: &host_key,
            policy: &policy,
        };
        let req = SignatureRequest {
            card_id: Uuid::new_v4(),
            role: SignerRole::System,
            method: AuthMethod::SystemGenerated,
            signer_id: None,
            signer_name: "n".into(),
            signer_email: "e@example.com".into(),
            credential: String::new(),
            ip: None,
            user_agent: None,
        };
        let err = collector.verify_credential(&req, Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "ROLE_NOT_ACCEPTED");
    }

    #[tokio::test]
    async fn host_signature_rejected_outside_approved_domains() {
        let participant_key = test_key();
        let host_key = test_key();
        let passwords = InMemoryPasswordVerifier::new();
        let nonces = InMemoryNonceStore::new();
        let mut policy = PolicyConfig::default();
        policy.approved_officer_domains = vec!["court.gov".to_string()];
        let collector = SignatureCollector {
            password_verifier: &passwords,
            nonce_store: &nonces,
            participant_key: &participant_key,
            host_key: &host_key,
            policy: &policy,
        };
        let nonce = nonces.issue(Uuid::new_v4(), "officer@not-approved.example", Utc::now(), 7).await;
        let req = SignatureRequest {
            card_id: Uuid::new_v4(),
            role: SignerRole::Host,
            method: AuthMethod::EmailLink,
            signer_id: None,
            signer_name: "Officer".into(),
            signer_email: "officer@not-approved.example".into(),
            credential: nonce,
            ip: None,
            user_agent: None,
        };
        let err = collector.verify_credential(&req, Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "OFFICER_DOMAIN_NOT_APPROVED");
    }
}
