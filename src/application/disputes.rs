use super::locks::PaymentLocks;
use crate::domain::dispute::{DisputeOutcome, MissionDispute};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::RecordStoreRef;
use crate::error::{Result, SettlementError};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Opens and closes disputes.
///
/// A dispute only gates settlement through `has_dispute`; it never writes the
/// payment status.
pub struct DisputeController {
    store: RecordStoreRef,
    locks: PaymentLocks,
    rejection_releases_hold: bool,
}

impl DisputeController {
    pub fn new(store: RecordStoreRef, locks: PaymentLocks, rejection_releases_hold: bool) -> Self {
        Self {
            store,
            locks,
            rejection_releases_hold,
        }
    }

    pub async fn open_dispute(
        &self,
        payment_id: &str,
        reporter_id: &str,
        reason: &str,
        description: Option<String>,
    ) -> Result<MissionDispute> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment_id.to_string()))?;

        if payment.status != PaymentStatus::Received {
            return Err(SettlementError::InvalidTransition {
                payment: payment.id,
                current: payment.status,
                action: "dispute",
            });
        }
        if self.store.open_dispute_for(payment_id).await?.is_some() {
            return Err(SettlementError::DisputeAlreadyOpen(payment.id));
        }

        let dispute = MissionDispute::open(payment_id, reporter_id, reason, description, Utc::now())?;
        self.store.insert_dispute(dispute.clone()).await?;
        self.store.set_dispute_flag(payment_id, true).await?;

        info!(
            payment_id = %payment_id,
            dispute_id = %dispute.id,
            reporter_id = %reporter_id,
            "Dispute opened, settlement on hold"
        );
        Ok(dispute)
    }

    pub async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        resolver_id: &str,
        outcome: DisputeOutcome,
        resolution: Option<String>,
    ) -> Result<MissionDispute> {
        let payment_id = self
            .store
            .get_dispute(dispute_id)
            .await?
            .ok_or(SettlementError::DisputeNotFound(dispute_id))?
            .payment_id;

        let _guard = self.locks.acquire(&payment_id).await;
        let mut dispute = self
            .store
            .get_dispute(dispute_id)
            .await?
            .ok_or(SettlementError::DisputeNotFound(dispute_id))?;
        dispute.close(resolver_id, outcome, resolution, Utc::now())?;
        self.store.update_dispute(&dispute).await?;

        let lifts_hold = match outcome {
            DisputeOutcome::Resolved => true,
            DisputeOutcome::Rejected => self.rejection_releases_hold,
        };
        if lifts_hold {
            self.store.set_dispute_flag(&payment_id, false).await?;
        }

        info!(
            payment_id = %payment_id,
            dispute_id = %dispute_id,
            resolver_id = %resolver_id,
            outcome = ?outcome,
            hold_lifted = lifts_hold,
            "Dispute closed"
        );
        Ok(dispute)
    }

    pub async fn open_dispute_for(&self, payment_id: &str) -> Result<Option<MissionDispute>> {
        self.store.open_dispute_for(payment_id).await
    }
}
