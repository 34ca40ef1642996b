//! Service-level configuration: host/port/secrets plus the embedded
//! [`PolicyConfig`] the engine is unit-tested against. Modeled directly
//! on `aegis-rpc::config::Config::from_env` — one env var per field,
//! parsed with `anyhow::Context`, falling back to a sane default.

use anyhow::{Context, Result};
use courtcard_core::config::{PolicyConfig, WindowRule};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Public base URL used to build `verificationUrl` on issued cards.
    pub public_base_url: String,

    /// Finalization scheduler tick period.
    pub finalizer_tick_sec: u64,

    /// Local time-of-day (HH:MM) the officer daily digest is rendered at.
    pub digest_cutoff_local_time: String,

    /// Database connection string for the production store. Unused by
    /// the in-memory reference store shipped in this crate; carried so
    /// the configuration surface matches spec.md §6's enumerated list.
    pub database_url: String,

    /// Shared secret used to verify provider webhook signatures.
    pub provider_webhook_secret: String,

    /// Signing key material, in production loaded from a secrets
    /// manager. Held as raw bytes here; `main.rs` derives Ed25519
    /// signing keys from them.
    pub jwt_signing_key: String,

    /// Mail transport credentials (opaque to this crate; passed through
    /// to whatever `MailTransport` impl is wired in).
    pub mail_transport_credentials: String,

    pub policy: PolicyConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let attendance_window_rule = match env_or("COURTCARD_WINDOW_RULE", "MAX_SIDE").as_str() {
            "CUMULATIVE_SUM" => WindowRule::CumulativeSum,
            _ => WindowRule::MaxSide,
        };
        let approved_officer_domains = std::env::var("COURTCARD_APPROVED_OFFICER_DOMAINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Ok(Config {
            host: env_or("COURTCARD_HOST", "0.0.0.0"),
            port: std::env::var("COURTCARD_PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("invalid COURTCARD_PORT")?,
            public_base_url: env_or("COURTCARD_PUBLIC_BASE_URL", "http://localhost:8080"),
            finalizer_tick_sec: env_parse("COURTCARD_FINALIZER_TICK_SEC", 120),
            digest_cutoff_local_time: env_or("COURTCARD_DIGEST_CUTOFF_LOCAL_TIME", "18:00"),
            database_url: env_or("COURTCARD_DATABASE_URL", "postgres://localhost/courtcard"),
            provider_webhook_secret: env_or("COURTCARD_PROVIDER_WEBHOOK_SECRET", "dev-shared-secret"),
            jwt_signing_key: env_or("COURTCARD_JWT_SIGNING_KEY", "dev-signing-key"),
            mail_transport_credentials: env_or("COURTCARD_MAIL_TRANSPORT_CREDENTIALS", ""),
            policy: PolicyConfig {
                grace_window_min: env_parse("COURTCARD_GRACE_WINDOW_MIN", 10),
                heartbeat_period_sec: env_parse("COURTCARD_HEARTBEAT_PERIOD_SEC", 30),
                session_idle_grace_min: env_parse("COURTCARD_SESSION_IDLE_GRACE_MIN", 15),
                attendance_window_rule,
                signature_max_email_link_days: env_parse("COURTCARD_SIGNATURE_MAX_EMAIL_LINK_DAYS", 7),
                approved_officer_domains,
                bypass_email_verification: env_parse("COURTCARD_BYPASS_EMAIL_VERIFICATION", false),
            },
        })
    }
}
