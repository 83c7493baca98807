use super::dispute::MissionDispute;
use super::finance::{FinanceStatus, MissionFinance};
use super::money::Currency;
use super::payment::{MissionPayment, PaymentStatus};
use super::transfer::{MissionTransfer, TransferStatus, TransferType};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Durable state of the settlement engine.
///
/// Implementations must make `update_payment_if`, `insert_finance_if_absent` and
/// `claim_event` atomic with respect to each other and to concurrent callers.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    /// Inserts a new payment. Fails if the id is taken.
    async fn insert_payment(&self, payment: MissionPayment) -> Result<()>;
    async fn get_payment(&self, payment_id: &str) -> Result<Option<MissionPayment>>;
    async fn all_payments(&self) -> Result<Vec<MissionPayment>>;

    /// Replaces the stored payment if its status still equals `expected`.
    ///
    /// The dispute flag is not written by this call; the stored value is kept.
    /// Returns `false` when the status changed underneath the caller.
    async fn update_payment_if(&self, payment: &MissionPayment, expected: PaymentStatus) -> Result<bool>;

    /// Sets or clears the dispute hold without touching the status.
    async fn set_dispute_flag(&self, payment_id: &str, has_dispute: bool) -> Result<()>;

    /// Stores the snapshot unless one already exists for the payment.
    async fn insert_finance_if_absent(&self, finance: MissionFinance) -> Result<bool>;
    async fn get_finance(&self, payment_id: &str) -> Result<Option<MissionFinance>>;
    async fn set_finance_status(&self, payment_id: &str, status: FinanceStatus) -> Result<()>;

    async fn insert_transfer(&self, transfer: MissionTransfer) -> Result<()>;
    async fn update_transfer(&self, transfer: &MissionTransfer) -> Result<()>;
    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<MissionTransfer>>;
    async fn transfers_for_payment(&self, payment_id: &str) -> Result<Vec<MissionTransfer>>;
    async fn transfers_with_status(&self, status: TransferStatus) -> Result<Vec<MissionTransfer>>;
    async fn find_transfer_by_reference(&self, reference: &str) -> Result<Option<MissionTransfer>>;

    async fn insert_dispute(&self, dispute: MissionDispute) -> Result<()>;
    async fn update_dispute(&self, dispute: &MissionDispute) -> Result<()>;
    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<MissionDispute>>;
    async fn open_dispute_for(&self, payment_id: &str) -> Result<Option<MissionDispute>>;

    /// Records `event_id` as processed. Returns `false` if it already was.
    async fn claim_event(&self, event_id: &str, event_type: &str) -> Result<bool>;
    /// Forgets a claim so a redelivery of the event is processed again.
    async fn release_event(&self, event_id: &str) -> Result<()>;
}

/// Where a participant's money goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutAccount {
    pub account_id: String,
    pub payouts_enabled: bool,
}

#[async_trait]
pub trait PayoutAccountDirectory: Send + Sync {
    /// `None` when the participant never onboarded a payout account.
    async fn resolve_payout_account(&self, participant_id: &str) -> Result<Option<PayoutAccount>>;
}

/// Data attached to a transfer at the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    /// Idempotency key: resubmitting the same key never moves money twice.
    pub transfer_id: Uuid,
    pub payment_id: String,
    pub mission_id: String,
    pub kind: TransferType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub destination_account_id: String,
    pub amount: u64,
    pub currency: Currency,
    pub metadata: TransferMetadata,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the processor's transfer reference.
    async fn create_transfer(&self, request: TransferRequest) -> Result<String>;
    fn verify_event_signature(&self, payload: &[u8], signature: &str) -> bool;
}

pub type RecordStoreRef = Arc<dyn PaymentRecordStore>;
pub type PayoutDirectoryRef = Arc<dyn PayoutAccountDirectory>;
pub type ProcessorRef = Arc<dyn PaymentProcessor>;
