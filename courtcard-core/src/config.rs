//! Policy configuration shared by the normalizer, reconciler, validator,
//! and finalization scheduler.
//!
//! This is deliberately separate from the service-level `Config` (host,
//! port, secrets) so the engine can be unit-tested with a plain literal
//! struct instead of environment variables — the network/secret wiring
//! lives in `courtcard-service::config`.

/// Which historical form of the attendance-window rule (R0) to apply.
///
/// The source material contains two coexisting versions; the design
/// adopts `MaxSide` as normative but keeps `CumulativeSum` selectable
/// rather than silently dropping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRule {
    /// max(lateness, earlyDeparture) > grace fails.
    MaxSide,
    /// lateness + earlyDeparture > grace fails.
    CumulativeSum,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub grace_window_min: i64,
    pub heartbeat_period_sec: i64,
    pub session_idle_grace_min: i64,
    pub attendance_window_rule: WindowRule,
    pub signature_max_email_link_days: i64,
    pub approved_officer_domains: Vec<String>,
    pub bypass_email_verification: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            grace_window_min: 10,
            heartbeat_period_sec: 30,
            session_idle_grace_min: 15,
            attendance_window_rule: WindowRule::MaxSide,
            signature_max_email_link_days: 7,
            approved_officer_domains: Vec::new(),
            bypass_email_verification: false,
        }
    }
}
