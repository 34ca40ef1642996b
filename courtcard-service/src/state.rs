//! Shared application state injected into every Axum handler via
//! `State(Arc<AppState>)`, following `indexer::api::build_router`'s
//! `State(Arc<EventProcessor>)` shape.

use courtcard_core::auth::{InMemoryNonceStore, PasswordVerifier};
use courtcard_core::config::PolicyConfig;
use courtcard_core::notify::Notification;
use courtcard_core::provider::ProviderClient;
use courtcard_core::render::CardRenderer;
use courtcard_core::snapshot::SnapshotStore;
use courtcard_core::store::Store;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub policy: PolicyConfig,
    pub public_base_url: String,
    pub notify_tx: Sender<Notification>,
    pub provider_client: Arc<dyn ProviderClient>,
    pub password_verifier: Arc<dyn PasswordVerifier>,
    pub nonce_store: Arc<InMemoryNonceStore>,
    pub participant_signing_key: SigningKey,
    pub host_signing_key: SigningKey,
    pub card_renderer: Arc<dyn CardRenderer>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
}
