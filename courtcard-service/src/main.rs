//! Service entry point: wires the reference collaborators into
//! [`AppState`], spawns the notification worker pool and the
//! leader-elected finalization scheduler, then serves the HTTP API.

use courtcard_core::auth::{InMemoryNonceStore, InMemoryPasswordVerifier};
use courtcard_core::issuer::CardIssuer;
use courtcard_core::notify::LoggingMailTransport;
use courtcard_core::provider::HmacProviderClient;
use courtcard_core::render::PlainTextCardRenderer;
use courtcard_core::snapshot::InMemorySnapshotStore;
use courtcard_core::store::Store;
use courtcard_service::config::Config;
use courtcard_service::memstore::InMemoryStore;
use courtcard_service::state::AppState;
use courtcard_service::{api, notify_worker, scheduler};
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const NOTIFY_QUEUE_CAPACITY: usize = 256;
const NOTIFY_WORKER_COUNT: usize = 4;
const SCHEDULER_LEASE_MULTIPLE: i64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::from_env()?;
    info!(host = %config.host, port = config.port, "starting court card service");

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());

    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(NOTIFY_QUEUE_CAPACITY);
    let mail_transport = Arc::new(LoggingMailTransport);
    let worker_handles = notify_worker::spawn_workers(notify_rx, mail_transport, NOTIFY_WORKER_COUNT);
    info!(workers = worker_handles.len(), "notification worker pool started");
    // Detached: workers run for the life of the process and drain until
    // `notify_tx` (held by `AppState` and the scheduler) is dropped.
    for handle in worker_handles {
        drop(handle);
    }

    let app_state = Arc::new(AppState {
        store: store.clone(),
        policy: config.policy.clone(),
        public_base_url: config.public_base_url.clone(),
        notify_tx: notify_tx.clone(),
        provider_client: Arc::new(HmacProviderClient::new(config.provider_webhook_secret.clone().into_bytes())),
        password_verifier: Arc::new(InMemoryPasswordVerifier::new()),
        nonce_store: Arc::new(InMemoryNonceStore::new()),
        participant_signing_key: derive_signing_key(&config.jwt_signing_key, "participant"),
        host_signing_key: derive_signing_key(&config.jwt_signing_key, "host"),
        card_renderer: Arc::new(PlainTextCardRenderer),
        snapshot_store: Arc::new(InMemorySnapshotStore::new()),
    });

    spawn_finalizer(store, config.clone(), notify_tx);

    let router = api::build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Deterministically derives an Ed25519 signing key from the
/// configured key material. A real deployment loads distinct
/// participant/host keys from a secrets manager; this derivation keeps
/// the two roles cryptographically distinct without requiring two
/// separate environment variables.
fn derive_signing_key(key_material: &str, role: &str) -> SigningKey {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key_material.as_bytes());
    hasher.update(b":");
    hasher.update(role.as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    SigningKey::from_bytes(&seed)
}

/// Spawns the periodic finalization tick, mirroring the teacher's
/// `tokio::spawn`-based background watcher. Every process in a fleet
/// runs this loop; [`Store::try_acquire_leader_lease`] ensures only one
/// holder actually executes a tick at a time.
fn spawn_finalizer(
    store: Arc<InMemoryStore>,
    config: Config,
    notify_tx: tokio::sync::mpsc::Sender<courtcard_core::notify::Notification>,
) {
    let holder_id = uuid::Uuid::new_v4().to_string();
    let tick_period = Duration::from_secs(config.finalizer_tick_sec.max(1));
    let lease_secs = config.finalizer_tick_sec as i64 * SCHEDULER_LEASE_MULTIPLE;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            match store.try_acquire_leader_lease(&holder_id, lease_secs).await {
                Ok(true) => {
                    let now = chrono::Utc::now();
                    let issuer = CardIssuer::new(&config.public_base_url);
                    match scheduler::run_tick(
                        store.as_ref(),
                        &config.policy,
                        &issuer,
                        &notify_tx,
                        &config.digest_cutoff_local_time,
                        now,
                    )
                    .await
                    {
                        Ok((closed, issued, digests_sent)) => {
                            if closed > 0 || issued > 0 || digests_sent > 0 {
                                info!(closed, issued, digests_sent, "finalizer tick complete");
                            }
                        }
                        Err(err) => warn!(error = %err, "finalizer tick failed"),
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "leader lease acquisition failed"),
            }
        }
    });
}
