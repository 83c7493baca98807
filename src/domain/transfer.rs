use super::finance::{MissionFinance, Payout};
use super::money::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    FreelancerPayout,
    CommercialCommission,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::FreelancerPayout => "freelancer_payout",
            TransferType::CommercialCommission => "commercial_commission",
        }
    }
}

/// `Pending` doubles as the in-flight claim: a transfer is marked pending under
/// the payment lock before it is submitted to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Created,
    Failed,
    Reversed,
}

/// A single money movement to a payout account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionTransfer {
    /// Also the idempotency key sent to the processor.
    pub id: Uuid,
    pub mission_id: String,
    pub payment_id: String,
    pub finance_id: Uuid,
    pub destination_participant_id: String,
    /// Resolved from the payout directory when the transfer is submitted.
    pub destination_account_id: Option<String>,
    pub kind: TransferType,
    pub amount: u64,
    pub currency: Currency,
    pub status: TransferStatus,
    pub processor_reference: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub transferred_at: Option<DateTime<Utc>>,
}

impl MissionTransfer {
    pub fn new(finance: &MissionFinance, payout: Payout, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mission_id: finance.mission_id.clone(),
            payment_id: finance.payment_id.clone(),
            finance_id: finance.id,
            destination_participant_id: payout.participant_id,
            destination_account_id: None,
            kind: payout.kind,
            amount: payout.amount,
            currency,
            status: TransferStatus::Pending,
            processor_reference: None,
            error_message: None,
            attempt_count: 0,
            created_at: now,
            last_attempt_at: None,
            transferred_at: None,
        }
    }

    /// Claims the transfer for one more submission.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = TransferStatus::Pending;
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_created(&mut self, account_id: String, reference: String, now: DateTime<Utc>) {
        self.status = TransferStatus::Created;
        self.destination_account_id = Some(account_id);
        self.processor_reference = Some(reference);
        self.error_message = None;
        self.transferred_at = Some(now);
    }

    pub fn mark_failed(&mut self, account_id: Option<String>, reason: String) {
        self.status = TransferStatus::Failed;
        if account_id.is_some() {
            self.destination_account_id = account_id;
        }
        self.error_message = Some(reason);
    }

    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }

    /// The payee holds the money: created and not reversed since.
    pub fn is_paid(&self) -> bool {
        self.status == TransferStatus::Created
    }
}
