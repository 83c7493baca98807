use super::distribution::{FundSplit, compute_split};
use super::payment::MissionPayment;
use super::transfer::TransferType;
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceStatus {
    Calculated,
    FundsReleased,
    PartiallyReleased,
}

/// Immutable snapshot of how one payment is split.
///
/// Created once, when the payment is first confirmed as received. Only `status`
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionFinance {
    pub id: Uuid,
    pub payment_id: String,
    pub mission_id: String,
    pub gross_amount: u64,
    pub platform_fee_amount: u64,
    pub commercial_fee_amount: u64,
    pub freelancer_amount: u64,
    /// Platform fee minus commercial fee minus processor fee.
    pub platform_net_amount: u64,
    pub processor_fee_amount: u64,
    pub commercial_id: Option<String>,
    pub freelancer_id: String,
    pub status: FinanceStatus,
    pub created_at: DateTime<Utc>,
}

/// One payee's share, derived from a finance snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub participant_id: String,
    pub kind: TransferType,
    pub amount: u64,
}

impl MissionFinance {
    pub fn calculate(
        payment: &MissionPayment,
        processor_fee_amount: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, SettlementError> {
        let split = compute_split(payment.amount.minor_units(), payment.has_commercial())?;
        Ok(Self::from_split(payment, split, processor_fee_amount, now))
    }

    fn from_split(
        payment: &MissionPayment,
        split: FundSplit,
        processor_fee_amount: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id.clone(),
            mission_id: payment.mission_id.clone(),
            gross_amount: payment.amount.minor_units(),
            platform_fee_amount: split.platform_fee_amount,
            commercial_fee_amount: split.commercial_fee_amount,
            freelancer_amount: split.freelancer_amount,
            platform_net_amount: split.platform_net_amount.saturating_sub(processor_fee_amount),
            processor_fee_amount,
            commercial_id: payment.commercial_id.clone(),
            freelancer_id: payment.freelancer_id.clone(),
            status: FinanceStatus::Calculated,
            created_at: now,
        }
    }

    /// Upper bound for the sum of non-reversed transfers of this payment.
    pub fn payable_amount(&self) -> u64 {
        self.freelancer_amount + self.commercial_fee_amount
    }

    /// The transfers this split calls for. Zero-amount shares are skipped.
    pub fn payouts(&self) -> Vec<Payout> {
        let mut payouts = Vec::with_capacity(2);
        if self.freelancer_amount > 0 {
            payouts.push(Payout {
                participant_id: self.freelancer_id.clone(),
                kind: TransferType::FreelancerPayout,
                amount: self.freelancer_amount,
            });
        }
        if let Some(commercial_id) = &self.commercial_id {
            if self.commercial_fee_amount > 0 {
                payouts.push(Payout {
                    participant_id: commercial_id.clone(),
                    kind: TransferType::CommercialCommission,
                    amount: self.commercial_fee_amount,
                });
            }
        }
        payouts
    }
}
