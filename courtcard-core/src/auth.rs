//! Authentication collaborators used by the Signature Collector (C6).
//!
//! Both traits are narrow seams onto systems this crate does not own: a
//! credential store for PARTICIPANT/PASSWORD signing, and the single-use
//! nonce ledger behind HOST/EMAIL_LINK signing. Each ships an in-memory
//! reference implementation for tests and for `courtcard-service` to use
//! until a production identity provider is wired in.

use crate::error::CoreResult;
use crate::model::Id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Verifies a participant's password without this crate ever seeing how
/// credentials are stored or hashed.
#[async_trait]
pub trait PasswordVerifier: Send + Sync {
    async fn verify(&self, participant_id: Id, password: &str) -> CoreResult<bool>;
}

/// Single-use, TTL-bound nonces minted out-of-band (mailed to the host)
/// and redeemed exactly once by [`crate::signatures::collect`].
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Consume the nonce if it exists, is unexpired, and is bound to this
    /// `(card_id, signer_email)` pair. Returns `false` on any mismatch;
    /// a nonce is removed from the store whether or not it matched, so a
    /// replay attempt never succeeds twice.
    async fn consume(
        &self,
        card_id: Id,
        signer_email: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool>;
}

struct NonceEntry {
    card_id: Id,
    signer_email: String,
    expires_at: DateTime<Utc>,
}

/// Reference `NonceStore`: an in-process map. Issuance (`issue`) is not
/// part of the trait because minting a link is the mail dispatcher's job,
/// not the signature collector's; `courtcard-service` wires the two
/// together behind the same `Arc`.
#[derive(Default)]
pub struct InMemoryNonceStore {
    nonces: Mutex<HashMap<String, NonceEntry>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, card_id: Id, signer_email: &str, now: DateTime<Utc>, ttl_days: i64) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        let entry = NonceEntry {
            card_id,
            signer_email: signer_email.to_ascii_lowercase(),
            expires_at: now + chrono::Duration::days(ttl_days),
        };
        self.nonces.lock().await.insert(nonce.clone(), entry);
        nonce
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn consume(
        &self,
        card_id: Id,
        signer_email: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let mut nonces = self.nonces.lock().await;
        let entry = match nonces.remove(nonce) {
            Some(e) => e,
            None => return Ok(false),
        };
        Ok(entry.card_id == card_id
            && entry.signer_email == signer_email.to_ascii_lowercase()
            && entry.expires_at >= now)
    }
}

/// Reference `PasswordVerifier` for tests: an in-memory map of
/// participant id -> expected password.
#[derive(Default)]
pub struct InMemoryPasswordVerifier {
    passwords: Mutex<HashMap<Id, String>>,
}

impl InMemoryPasswordVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, participant_id: Id, password: impl Into<String>) {
        self.passwords.lock().await.insert(participant_id, password.into());
    }
}

#[async_trait]
impl PasswordVerifier for InMemoryPasswordVerifier {
    async fn verify(&self, participant_id: Id, password: &str) -> CoreResult<bool> {
        let passwords = self.passwords.lock().await;
        Ok(passwords.get(&participant_id).map(|p| p.as_str()) == Some(password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonce_redeems_once() {
        let store = InMemoryNonceStore::new();
        let card_id = Id::new_v4();
        let now = Utc::now();
        let nonce = store.issue(card_id, "host@court.gov", now, 7).await;
        assert!(store.consume(card_id, "host@court.gov", &nonce, now).await.unwrap());
        assert!(!store.consume(card_id, "host@court.gov", &nonce, now).await.unwrap());
    }

    #[tokio::test]
    async fn nonce_rejects_expired() {
        let store = InMemoryNonceStore::new();
        let card_id = Id::new_v4();
        let now = Utc::now();
        let nonce = store.issue(card_id, "host@court.gov", now - chrono::Duration::days(8), 7).await;
        assert!(!store.consume(card_id, "host@court.gov", &nonce, now).await.unwrap());
    }

    #[tokio::test]
    async fn password_verifier_matches_set_password() {
        let v = InMemoryPasswordVerifier::new();
        let pid = Id::new_v4();
        v.set(pid, "hunter2").await;
        assert!(v.verify(pid, "hunter2").await.unwrap());
        assert!(!v.verify(pid, "wrong").await.unwrap());
    }
}
