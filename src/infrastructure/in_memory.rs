use crate::domain::dispute::MissionDispute;
use crate::domain::finance::{FinanceStatus, MissionFinance};
use crate::domain::payment::{MissionPayment, PaymentStatus};
use crate::domain::ports::{PaymentRecordStore, PayoutAccount, PayoutAccountDirectory};
use crate::domain::transfer::{MissionTransfer, TransferStatus};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn missing_payment(payment_id: &str) -> SettlementError {
    SettlementError::PaymentNotFound(payment_id.to_string())
}

/// A thread-safe in-memory record store.
///
/// Each table sits behind its own `RwLock`; the conditional writes take the
/// table's write lock for the whole read-compare-write, which makes them atomic.
/// Ideal for tests and for replaying operator scripts.
#[derive(Default, Clone)]
pub struct InMemoryRecordStore {
    payments: Arc<RwLock<HashMap<String, MissionPayment>>>,
    finances: Arc<RwLock<HashMap<String, MissionFinance>>>,
    transfers: Arc<RwLock<HashMap<Uuid, MissionTransfer>>>,
    disputes: Arc<RwLock<HashMap<Uuid, MissionDispute>>>,
    events: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryRecordStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRecordStore for InMemoryRecordStore {
    async fn insert_payment(&self, payment: MissionPayment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(SettlementError::ValidationError(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<MissionPayment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(payment_id).cloned())
    }

    async fn all_payments(&self) -> Result<Vec<MissionPayment>> {
        let payments = self.payments.read().await;
        let mut all: Vec<MissionPayment> = payments.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn update_payment_if(&self, payment: &MissionPayment, expected: PaymentStatus) -> Result<bool> {
        let mut payments = self.payments.write().await;
        let current = payments
            .get_mut(&payment.id)
            .ok_or_else(|| missing_payment(&payment.id))?;
        if current.status != expected {
            return Ok(false);
        }
        let has_dispute = current.has_dispute;
        *current = payment.clone();
        current.has_dispute = has_dispute;
        Ok(true)
    }

    async fn set_dispute_flag(&self, payment_id: &str, has_dispute: bool) -> Result<()> {
        let mut payments = self.payments.write().await;
        let current = payments
            .get_mut(payment_id)
            .ok_or_else(|| missing_payment(payment_id))?;
        current.has_dispute = has_dispute;
        Ok(())
    }

    async fn insert_finance_if_absent(&self, finance: MissionFinance) -> Result<bool> {
        let mut finances = self.finances.write().await;
        if finances.contains_key(&finance.payment_id) {
            return Ok(false);
        }
        finances.insert(finance.payment_id.clone(), finance);
        Ok(true)
    }

    async fn get_finance(&self, payment_id: &str) -> Result<Option<MissionFinance>> {
        let finances = self.finances.read().await;
        Ok(finances.get(payment_id).cloned())
    }

    async fn set_finance_status(&self, payment_id: &str, status: FinanceStatus) -> Result<()> {
        let mut finances = self.finances.write().await;
        if let Some(finance) = finances.get_mut(payment_id) {
            finance.status = status;
        }
        Ok(())
    }

    async fn insert_transfer(&self, transfer: MissionTransfer) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        transfers.insert(transfer.id, transfer);
        Ok(())
    }

    async fn update_transfer(&self, transfer: &MissionTransfer) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<MissionTransfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers.get(&transfer_id).cloned())
    }

    async fn transfers_for_payment(&self, payment_id: &str) -> Result<Vec<MissionTransfer>> {
        let transfers = self.transfers.read().await;
        let mut found: Vec<MissionTransfer> = transfers
            .values()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.created_at, t.kind.as_str()));
        Ok(found)
    }

    async fn transfers_with_status(&self, status: TransferStatus) -> Result<Vec<MissionTransfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers.values().filter(|t| t.status == status).cloned().collect())
    }

    async fn find_transfer_by_reference(&self, reference: &str) -> Result<Option<MissionTransfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|t| t.processor_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn insert_dispute(&self, dispute: MissionDispute) -> Result<()> {
        let mut disputes = self.disputes.write().await;
        disputes.insert(dispute.id, dispute);
        Ok(())
    }

    async fn update_dispute(&self, dispute: &MissionDispute) -> Result<()> {
        let mut disputes = self.disputes.write().await;
        disputes.insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<MissionDispute>> {
        let disputes = self.disputes.read().await;
        Ok(disputes.get(&dispute_id).cloned())
    }

    async fn open_dispute_for(&self, payment_id: &str) -> Result<Option<MissionDispute>> {
        let disputes = self.disputes.read().await;
        Ok(disputes
            .values()
            .find(|d| d.payment_id == payment_id && d.is_open())
            .cloned())
    }

    async fn claim_event(&self, event_id: &str, event_type: &str) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(event_id) {
            return Ok(false);
        }
        events.insert(event_id.to_string(), event_type.to_string());
        Ok(true)
    }

    async fn release_event(&self, event_id: &str) -> Result<()> {
        let mut events = self.events.write().await;
        events.remove(event_id);
        Ok(())
    }
}

/// Payout accounts registered in memory, keyed by participant id.
#[derive(Default, Clone)]
pub struct InMemoryPayoutDirectory {
    accounts: Arc<RwLock<HashMap<String, PayoutAccount>>>,
}

impl InMemoryPayoutDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the payout account of a participant.
    pub async fn register(&self, participant_id: &str, account_id: &str, payouts_enabled: bool) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(
            participant_id.to_string(),
            PayoutAccount {
                account_id: account_id.to_string(),
                payouts_enabled,
            },
        );
    }
}

#[async_trait]
impl PayoutAccountDirectory for InMemoryPayoutDirectory {
    async fn resolve_payout_account(&self, participant_id: &str) -> Result<Option<PayoutAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(participant_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::tests::sample_payment;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_payment_rejects_duplicate_id() {
        let store = InMemoryRecordStore::new();
        store.insert_payment(sample_payment("p1", false)).await.unwrap();
        assert!(store.insert_payment(sample_payment("p1", false)).await.is_err());
        assert!(store.get_payment("p1").await.unwrap().is_some());
        assert!(store.get_payment("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_payment_if_compares_status() {
        let store = InMemoryRecordStore::new();
        let payment = sample_payment("p1", false);
        store.insert_payment(payment.clone()).await.unwrap();

        let mut received = payment.clone();
        received.transition(PaymentStatus::Received, Utc::now());
        assert!(store.update_payment_if(&received, PaymentStatus::Pending).await.unwrap());

        // a second writer holding the stale status loses
        let mut failed = payment.clone();
        failed.transition(PaymentStatus::Failed, Utc::now());
        assert!(!store.update_payment_if(&failed, PaymentStatus::Pending).await.unwrap());

        let stored = store.get_payment("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Received);
    }

    #[tokio::test]
    async fn test_update_payment_if_keeps_dispute_flag() {
        let store = InMemoryRecordStore::new();
        let payment = sample_payment("p1", false);
        store.insert_payment(payment.clone()).await.unwrap();
        store.set_dispute_flag("p1", true).await.unwrap();

        let mut received = payment.clone();
        received.transition(PaymentStatus::Received, Utc::now());
        assert!(!received.has_dispute);
        store.update_payment_if(&received, PaymentStatus::Pending).await.unwrap();

        let stored = store.get_payment("p1").await.unwrap().unwrap();
        assert!(stored.has_dispute);
        assert_eq!(stored.status, PaymentStatus::Received);
    }

    #[tokio::test]
    async fn test_finance_inserted_once() {
        let store = InMemoryRecordStore::new();
        let payment = sample_payment("p1", false);
        let first = MissionFinance::calculate(&payment, 0, Utc::now()).unwrap();
        let second = MissionFinance::calculate(&payment, 0, Utc::now()).unwrap();

        assert!(store.insert_finance_if_absent(first.clone()).await.unwrap());
        assert!(!store.insert_finance_if_absent(second).await.unwrap());
        assert_eq!(store.get_finance("p1").await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_claim_event_is_insert_if_absent() {
        let store = InMemoryRecordStore::new();
        assert!(store.claim_event("evt_1", "charge.refunded").await.unwrap());
        assert!(!store.claim_event("evt_1", "charge.refunded").await.unwrap());

        store.release_event("evt_1").await.unwrap();
        assert!(store.claim_event("evt_1", "charge.refunded").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = InMemoryRecordStore::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_event("evt_race", "payment_intent.succeeded").await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_open_dispute_lookup() {
        let store = InMemoryRecordStore::new();
        let mut dispute = MissionDispute::open("p1", "r1", "late", None, Utc::now()).unwrap();
        store.insert_dispute(dispute.clone()).await.unwrap();
        assert_eq!(store.open_dispute_for("p1").await.unwrap().unwrap().id, dispute.id);

        dispute
            .close("admin", crate::domain::dispute::DisputeOutcome::Resolved, None, Utc::now())
            .unwrap();
        store.update_dispute(&dispute).await.unwrap();
        assert!(store.open_dispute_for("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payout_directory() {
        let directory = InMemoryPayoutDirectory::new();
        directory.register("f1", "acct_1", false).await;
        let account = directory.resolve_payout_account("f1").await.unwrap().unwrap();
        assert_eq!(account.account_id, "acct_1");
        assert!(!account.payouts_enabled);
        assert!(directory.resolve_payout_account("f2").await.unwrap().is_none());
    }
}
