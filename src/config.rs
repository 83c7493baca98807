use std::time::Duration;

/// Transfer attempts allowed before a payment is escalated to `errored`.
pub const DEFAULT_MAX_TRANSFER_ATTEMPTS: u32 = 3;

/// Tunables of the settlement engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    pub max_transfer_attempts: u32,
    /// Upper bound on a single processor transfer call.
    pub transfer_timeout: Duration,
    /// Period of the reconciliation sweep.
    pub sweep_interval: Duration,
    /// A `pending` transfer whose last attempt is older than this is re-submitted.
    pub stale_pending_after: Duration,
    /// Whether closing a dispute as `rejected` lifts the settlement hold.
    pub rejection_releases_hold: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_transfer_attempts: DEFAULT_MAX_TRANSFER_ATTEMPTS,
            transfer_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            stale_pending_after: Duration::from_secs(600),
            rejection_releases_hold: true,
        }
    }
}
