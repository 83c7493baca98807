use super::disputes::DisputeController;
use super::ingestion::{EventGate, IngestOutcome};
use super::locks::PaymentLocks;
use super::reconciliation::{ReconcilerHandle, ReconciliationDriver, SweepReport};
use super::settlement::{ReleaseReport, SettlementMachine};
use crate::config::SettlementConfig;
use crate::domain::dispute::{DisputeOutcome, MissionDispute};
use crate::domain::payment::{MissionPayment, NewPayment, PaymentStatusView};
use crate::domain::ports::{PayoutDirectoryRef, ProcessorRef, RecordStoreRef};
use crate::error::{Result, SettlementError};
use std::sync::Arc;
use uuid::Uuid;

/// Acknowledgement returned to the processor for one webhook delivery.
///
/// Any receipt acknowledges the delivery. `accepted` is false when the state
/// machine refused the event for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReceipt {
    pub accepted: bool,
    pub duplicate: bool,
}

/// The main entry point of the settlement engine.
///
/// `SettlementEngine` wires the state machine, the event gate, the dispute
/// controller and the reconciliation driver around one shared store and one
/// set of payment locks.
pub struct SettlementEngine {
    machine: Arc<SettlementMachine>,
    gate: EventGate,
    disputes: DisputeController,
    reconciler: ReconciliationDriver,
}

impl SettlementEngine {
    /// Creates a new `SettlementEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable payments, finances, transfers, disputes and event ids.
    /// * `directory` - Resolves participants to payout accounts.
    /// * `processor` - Moves money and authenticates webhooks.
    /// * `config` - Retry ceiling, timeouts and dispute policy.
    pub fn new(
        store: RecordStoreRef,
        directory: PayoutDirectoryRef,
        processor: ProcessorRef,
        config: SettlementConfig,
    ) -> Self {
        let locks = PaymentLocks::new();
        let disputes =
            DisputeController::new(store.clone(), locks.clone(), config.rejection_releases_hold);
        let machine = Arc::new(SettlementMachine::new(
            store.clone(),
            directory,
            processor.clone(),
            locks,
            config,
        ));
        let gate = EventGate::new(store, processor, machine.clone());
        let reconciler = ReconciliationDriver::new(machine.clone());
        Self {
            machine,
            gate,
            disputes,
            reconciler,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        self.machine.config()
    }

    pub async fn open_checkout(&self, new_payment: NewPayment) -> Result<MissionPayment> {
        self.machine.open_checkout(new_payment).await
    }

    /// Handles one webhook delivery.
    ///
    /// Invalid signatures and malformed bodies are errors. Duplicates and
    /// business rejections are acknowledged so the processor stops redelivering.
    pub async fn handle_processor_event(&self, raw_payload: &[u8], signature: &str) -> Result<EventReceipt> {
        let outcome = self.gate.ingest(raw_payload, signature).await?;
        Ok(EventReceipt {
            accepted: !matches!(outcome, IngestOutcome::Rejected(_)),
            duplicate: outcome == IngestOutcome::Duplicate,
        })
    }

    pub async fn request_release(&self, payment_id: &str, requested_by: &str) -> Result<ReleaseReport> {
        self.machine.request_release(payment_id, requested_by).await
    }

    pub async fn report_dispute(
        &self,
        payment_id: &str,
        reporter_id: &str,
        reason: &str,
        description: Option<String>,
    ) -> Result<MissionDispute> {
        self.disputes
            .open_dispute(payment_id, reporter_id, reason, description)
            .await
    }

    pub async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        resolver_id: &str,
        outcome: DisputeOutcome,
        resolution: Option<String>,
    ) -> Result<MissionDispute> {
        self.disputes
            .resolve_dispute(dispute_id, resolver_id, outcome, resolution)
            .await
    }

    pub async fn open_dispute_for(&self, payment_id: &str) -> Result<Option<MissionDispute>> {
        self.disputes.open_dispute_for(payment_id).await
    }

    pub async fn get_payment_status(&self, payment_id: &str) -> Result<PaymentStatusView> {
        let payment = self
            .machine
            .store()
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment_id.to_string()))?;
        Ok(PaymentStatusView::from(&payment))
    }

    /// Runs one reconciliation sweep now.
    pub async fn reconcile(&self) -> Result<SweepReport> {
        self.reconciler.sweep().await
    }

    /// Starts the periodic sweep on the configured interval.
    pub fn spawn_reconciler(&self) -> ReconcilerHandle {
        self.reconciler
            .clone()
            .spawn(self.machine.config().sweep_interval)
    }

    /// Consumes the engine and returns every payment, oldest first.
    pub async fn into_results(self) -> Result<Vec<MissionPayment>> {
        self.machine.store().all_payments().await
    }
}
