use super::locks::PaymentLocks;
use crate::config::SettlementConfig;
use crate::domain::event::{PaymentSucceeded, ProcessorEvent};
use crate::domain::finance::{FinanceStatus, MissionFinance};
use crate::domain::money::Currency;
use crate::domain::payment::{MissionPayment, NewPayment, PaymentStatus};
use crate::domain::ports::{
    PayoutDirectoryRef, ProcessorRef, RecordStoreRef, TransferMetadata, TransferRequest,
};
use crate::domain::transfer::{MissionTransfer, TransferStatus};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// What applying a processor event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    Applied,
    AlreadyApplied,
    Ignored,
}

/// State of a payment and its transfers after a release attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseReport {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub transfers: Vec<MissionTransfer>,
}

impl ReleaseReport {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Distributed
    }

    pub fn failed_transfers(&self) -> impl Iterator<Item = &MissionTransfer> {
        self.transfers
            .iter()
            .filter(|t| t.status == TransferStatus::Failed)
    }
}

/// Result of one reconciliation pass over a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedriveOutcome {
    /// Not eligible: not `received`, or held by a dispute.
    Skipped,
    /// Nothing to re-submit.
    Idle,
    /// Transfers were re-submitted; some are still outstanding.
    Retried,
    /// The payment is now distributed.
    Recovered,
    /// The payment was escalated to `errored`.
    Exhausted,
}

enum Submission {
    Created {
        account_id: String,
        reference: String,
    },
    Failed {
        account_id: Option<String>,
        error: SettlementError,
    },
}

/// Owner of `MissionPayment.status`.
///
/// Every transition runs under the payment's lock and is written with a status
/// compare-and-swap. Processor calls happen outside the lock: transfers are
/// claimed (marked `pending`) under the lock, submitted, and their outcome is
/// recorded after reacquiring it.
pub struct SettlementMachine {
    store: RecordStoreRef,
    directory: PayoutDirectoryRef,
    processor: ProcessorRef,
    locks: PaymentLocks,
    config: SettlementConfig,
}

impl SettlementMachine {
    pub fn new(
        store: RecordStoreRef,
        directory: PayoutDirectoryRef,
        processor: ProcessorRef,
        locks: PaymentLocks,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            directory,
            processor,
            locks,
            config,
        }
    }

    pub fn store(&self) -> &RecordStoreRef {
        &self.store
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Registers a freshly initiated checkout as a `pending` payment.
    pub async fn open_checkout(&self, new_payment: NewPayment) -> Result<MissionPayment> {
        if new_payment.id.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "Payment id must not be empty".to_string(),
            ));
        }
        let payment = MissionPayment::new(new_payment, Utc::now());
        self.store.insert_payment(payment.clone()).await?;
        info!(
            payment_id = %payment.id,
            mission_id = %payment.mission_id,
            amount = payment.amount.minor_units(),
            currency = %payment.currency,
            "Checkout opened"
        );
        Ok(payment)
    }

    pub async fn apply_event(&self, event: &ProcessorEvent) -> Result<EventEffect> {
        match event {
            ProcessorEvent::PaymentSucceeded(succeeded) => self.confirm_receipt(succeeded).await,
            ProcessorEvent::PaymentFailed(failed) => {
                debug!(payment_id = %failed.payment_id, reason = ?failed.reason, "Payment failed at processor");
                self.close_payment(&failed.payment_id, PaymentStatus::Failed, "fail")
                    .await
            }
            ProcessorEvent::PaymentRefunded(refunded) => {
                self.close_payment(&refunded.payment_id, PaymentStatus::Refunded, "refund")
                    .await
            }
            ProcessorEvent::TransferReversed(reversed) => {
                self.reverse_transfer(&reversed.reference).await
            }
            ProcessorEvent::Unhandled { event_type } => {
                info!(event_type = %event_type, "Ignoring unhandled processor event");
                Ok(EventEffect::Ignored)
            }
        }
    }

    async fn load_payment(&self, payment_id: &str) -> Result<MissionPayment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment_id.to_string()))
    }

    /// Moves `payment` to `next` with a compare-and-swap on its current status.
    async fn swap_status(
        &self,
        payment: &mut MissionPayment,
        next: PaymentStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expected = payment.status;
        if !payment.transition(next, now) {
            return Err(SettlementError::InvalidTransition {
                payment: payment.id.clone(),
                current: expected,
                action,
            });
        }
        if !self.store.update_payment_if(payment, expected).await? {
            let current = self.load_payment(&payment.id).await?.status;
            return Err(SettlementError::InvalidTransition {
                payment: payment.id.clone(),
                current,
                action,
            });
        }
        Ok(())
    }

    async fn confirm_receipt(&self, event: &PaymentSucceeded) -> Result<EventEffect> {
        let _guard = self.locks.acquire(&event.payment_id).await;
        let mut payment = self.load_payment(&event.payment_id).await?;

        match payment.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Received => {
                // a second success notification for the same checkout
                self.ensure_finance(&payment, event.fee.unwrap_or(0)).await?;
                return Ok(EventEffect::AlreadyApplied);
            }
            PaymentStatus::Distributed | PaymentStatus::Errored | PaymentStatus::Refunded => {
                return Ok(EventEffect::AlreadyApplied);
            }
            PaymentStatus::Failed => {
                return Err(SettlementError::InvalidTransition {
                    payment: payment.id,
                    current: PaymentStatus::Failed,
                    action: "confirm receipt of",
                });
            }
        }

        if let Some(amount) = event.amount {
            if amount != payment.amount.minor_units() {
                return Err(SettlementError::ValidationError(format!(
                    "Payment {} expects {} minor units, processor reported {}",
                    payment.id,
                    payment.amount.minor_units(),
                    amount
                )));
            }
        }
        if let Some(currency) = &event.currency {
            if Currency::new(currency)? != payment.currency {
                return Err(SettlementError::ValidationError(format!(
                    "Payment {} is settled in {}, processor reported {}",
                    payment.id, payment.currency, currency
                )));
            }
        }

        // The snapshot goes in first so that `received` always implies a finance row.
        self.ensure_finance(&payment, event.fee.unwrap_or(0)).await?;
        payment.processor_reference = Some(event.reference.clone());
        self.swap_status(&mut payment, PaymentStatus::Received, "confirm receipt of", Utc::now())
            .await?;

        info!(
            payment_id = %payment.id,
            reference = %event.reference,
            "Payment received"
        );
        Ok(EventEffect::Applied)
    }

    async fn ensure_finance(&self, payment: &MissionPayment, processor_fee: u64) -> Result<()> {
        if self.store.get_finance(&payment.id).await?.is_some() {
            return Ok(());
        }
        let finance = MissionFinance::calculate(payment, processor_fee, Utc::now())?;
        if self.store.insert_finance_if_absent(finance.clone()).await? {
            info!(
                payment_id = %payment.id,
                freelancer_amount = finance.freelancer_amount,
                platform_fee_amount = finance.platform_fee_amount,
                commercial_fee_amount = finance.commercial_fee_amount,
                platform_net_amount = finance.platform_net_amount,
                "Fund distribution calculated"
            );
        }
        Ok(())
    }

    async fn close_payment(
        &self,
        payment_id: &str,
        terminal: PaymentStatus,
        action: &'static str,
    ) -> Result<EventEffect> {
        let _guard = self.locks.acquire(payment_id).await;
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status == terminal {
            return Ok(EventEffect::AlreadyApplied);
        }
        self.swap_status(&mut payment, terminal, action, Utc::now())
            .await?;
        warn!(payment_id = %payment_id, status = %terminal, "Payment closed by processor");
        Ok(EventEffect::Applied)
    }

    async fn reverse_transfer(&self, reference: &str) -> Result<EventEffect> {
        let Some(found) = self.store.find_transfer_by_reference(reference).await? else {
            warn!(reference = %reference, "Reversal for an unknown transfer");
            return Ok(EventEffect::Ignored);
        };

        let _guard = self.locks.acquire(&found.payment_id).await;
        let Some(mut transfer) = self.store.get_transfer(found.id).await? else {
            return Ok(EventEffect::Ignored);
        };
        if transfer.status == TransferStatus::Reversed {
            return Ok(EventEffect::AlreadyApplied);
        }
        transfer.status = TransferStatus::Reversed;
        self.store.update_transfer(&transfer).await?;
        warn!(
            payment_id = %transfer.payment_id,
            transfer_id = %transfer.id,
            reference = %reference,
            "Transfer reversed by processor"
        );

        // A share clawed back before distribution completed is not re-sent automatically.
        let payment = self.load_payment(&transfer.payment_id).await?;
        if payment.status == PaymentStatus::Received {
            error!(
                payment_id = %payment.id,
                transfer_id = %transfer.id,
                kind = transfer.kind.as_str(),
                "Transfer reversed before distribution completed"
            );
            self.escalate_locked(&payment.id, Utc::now()).await?;
        }
        Ok(EventEffect::Applied)
    }

    /// Attempts `received → distributed`.
    ///
    /// Creates the transfers on the first call and submits every transfer that has
    /// never been attempted. Failed transfers are left to the reconciliation sweep.
    pub async fn request_release(&self, payment_id: &str, requested_by: &str) -> Result<ReleaseReport> {
        let claimed = {
            let _guard = self.locks.acquire(payment_id).await;
            let payment = self.load_payment(payment_id).await?;
            match payment.status {
                PaymentStatus::Received => {}
                PaymentStatus::Errored => {
                    return Err(SettlementError::RetryExhausted(payment.id));
                }
                current => {
                    return Err(SettlementError::InvalidTransition {
                        payment: payment.id,
                        current,
                        action: "release",
                    });
                }
            }
            if payment.has_dispute {
                info!(payment_id = %payment_id, requested_by = %requested_by, "Release blocked by open dispute");
                return Err(SettlementError::SettlementBlocked(payment.id));
            }

            let finance = self.store.get_finance(payment_id).await?.ok_or_else(|| {
                SettlementError::InternalError(
                    format!("payment {} is received without a finance snapshot", payment_id).into(),
                )
            })?;
            let mut transfers = self.store.transfers_for_payment(payment_id).await?;
            if transfers.is_empty() {
                transfers = self.plan_transfers(&payment, &finance).await?;
            }

            let now = Utc::now();
            let mut claimed = Vec::new();
            for mut transfer in transfers {
                if transfer.status == TransferStatus::Pending && transfer.attempt_count == 0 {
                    transfer.begin_attempt(now);
                    self.store.update_transfer(&transfer).await?;
                    claimed.push(transfer);
                }
            }
            info!(
                payment_id = %payment_id,
                requested_by = %requested_by,
                transfers = claimed.len(),
                "Release requested"
            );
            claimed
        };

        let submissions = self.submit_all(claimed).await;
        self.record_outcomes(payment_id, submissions).await?;
        self.report(payment_id).await
    }

    async fn plan_transfers(
        &self,
        payment: &MissionPayment,
        finance: &MissionFinance,
    ) -> Result<Vec<MissionTransfer>> {
        let now = Utc::now();
        let transfers: Vec<MissionTransfer> = finance
            .payouts()
            .into_iter()
            .map(|payout| MissionTransfer::new(finance, payout, payment.currency.clone(), now))
            .collect();

        let total: u64 = transfers.iter().map(|t| t.amount).sum();
        if total > finance.payable_amount() {
            return Err(SettlementError::InternalError(
                format!(
                    "transfers of payment {} total {} but only {} is payable",
                    payment.id,
                    total,
                    finance.payable_amount()
                )
                .into(),
            ));
        }

        for transfer in &transfers {
            self.store.insert_transfer(transfer.clone()).await?;
        }
        Ok(transfers)
    }

    async fn report(&self, payment_id: &str) -> Result<ReleaseReport> {
        let payment = self.load_payment(payment_id).await?;
        let transfers = self.store.transfers_for_payment(payment_id).await?;
        Ok(ReleaseReport {
            payment_id: payment.id,
            status: payment.status,
            transfers,
        })
    }

    async fn submit_all(&self, claimed: Vec<MissionTransfer>) -> Vec<(MissionTransfer, Submission)> {
        let mut submissions = Vec::with_capacity(claimed.len());
        for transfer in claimed {
            let submission = self.submit(&transfer).await;
            submissions.push((transfer, submission));
        }
        submissions
    }

    async fn submit(&self, transfer: &MissionTransfer) -> Submission {
        let participant = &transfer.destination_participant_id;
        let account = match self.directory.resolve_payout_account(participant).await {
            Ok(Some(account)) if account.payouts_enabled => account,
            Ok(Some(account)) => {
                return Submission::Failed {
                    account_id: Some(account.account_id),
                    error: SettlementError::PayoutAccountNotReady(participant.clone()),
                };
            }
            Ok(None) => {
                return Submission::Failed {
                    account_id: None,
                    error: SettlementError::PayoutAccountNotReady(participant.clone()),
                };
            }
            Err(error) => {
                return Submission::Failed {
                    account_id: None,
                    error,
                };
            }
        };

        let request = TransferRequest {
            destination_account_id: account.account_id.clone(),
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            metadata: TransferMetadata {
                transfer_id: transfer.id,
                payment_id: transfer.payment_id.clone(),
                mission_id: transfer.mission_id.clone(),
                kind: transfer.kind,
            },
        };

        let call = self.processor.create_transfer(request);
        match tokio::time::timeout(self.config.transfer_timeout, call).await {
            Ok(Ok(reference)) => Submission::Created {
                account_id: account.account_id,
                reference,
            },
            Ok(Err(error)) => Submission::Failed {
                account_id: Some(account.account_id),
                error,
            },
            Err(_) => Submission::Failed {
                account_id: Some(account.account_id),
                error: SettlementError::Processor(format!(
                    "transfer call timed out after {:?}",
                    self.config.transfer_timeout
                )),
            },
        }
    }

    async fn record_outcomes(
        &self,
        payment_id: &str,
        submissions: Vec<(MissionTransfer, Submission)>,
    ) -> Result<()> {
        let _guard = self.locks.acquire(payment_id).await;
        let now = Utc::now();
        let payment = self.load_payment(payment_id).await?;
        let mut exhausted = false;

        for (claimed, submission) in submissions {
            let Some(mut transfer) = self.store.get_transfer(claimed.id).await? else {
                continue;
            };
            if transfer.status != TransferStatus::Pending
                || transfer.attempt_count != claimed.attempt_count
            {
                debug!(transfer_id = %transfer.id, "Outcome superseded by a newer attempt");
                continue;
            }

            match submission {
                Submission::Created { account_id, reference } => {
                    if payment.status != PaymentStatus::Received {
                        error!(
                            payment_id = %payment_id,
                            transfer_id = %transfer.id,
                            status = %payment.status,
                            "Transfer completed after the payment left received"
                        );
                    }
                    info!(
                        payment_id = %payment_id,
                        transfer_id = %transfer.id,
                        kind = transfer.kind.as_str(),
                        amount = transfer.amount,
                        reference = %reference,
                        "Transfer created"
                    );
                    transfer.mark_created(account_id, reference, now);
                }
                Submission::Failed { account_id, error } => {
                    let failure = SettlementError::TransferFailed {
                        transfer: transfer.id,
                        reason: error.to_string(),
                    };
                    warn!(
                        payment_id = %payment_id,
                        attempt = transfer.attempt_count,
                        error = %failure,
                        "Transfer attempt failed"
                    );
                    transfer.mark_failed(account_id, error.to_string());
                    if transfer.is_exhausted(self.config.max_transfer_attempts) {
                        exhausted = true;
                    }
                }
            }
            self.store.update_transfer(&transfer).await?;
        }

        if exhausted {
            self.escalate_locked(payment_id, now).await?;
        }
        self.finalize_locked(payment_id, now).await
    }

    /// Pushes a `received` payment to `errored`. Caller holds the payment lock.
    async fn escalate_locked(&self, payment_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status != PaymentStatus::Received {
            return Ok(());
        }
        self.swap_status(&mut payment, PaymentStatus::Errored, "escalate", now)
            .await?;
        let error = SettlementError::RetryExhausted(payment_id.to_string());
        error!(
            payment_id = %payment_id,
            max_attempts = self.config.max_transfer_attempts,
            error = %error,
            "Manual intervention required: transfer retries exhausted"
        );
        Ok(())
    }

    /// Completes the distribution once every payout of the split has a created
    /// transfer. Caller holds the payment lock.
    async fn finalize_locked(&self, payment_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status != PaymentStatus::Received {
            return Ok(());
        }
        if payment.has_dispute {
            debug!(payment_id = %payment_id, "Distribution held by open dispute");
            return Ok(());
        }
        let Some(finance) = self.store.get_finance(payment_id).await? else {
            return Ok(());
        };

        let transfers = self.store.transfers_for_payment(payment_id).await?;
        let created = transfers.iter().filter(|t| t.is_paid()).count();
        let complete = finance.payouts().iter().all(|payout| {
            transfers
                .iter()
                .any(|t| t.kind == payout.kind && t.is_paid())
        });

        if complete {
            self.swap_status(&mut payment, PaymentStatus::Distributed, "distribute", now)
                .await?;
            self.store
                .set_finance_status(payment_id, FinanceStatus::FundsReleased)
                .await?;
            info!(payment_id = %payment_id, transfers = created, "Payment distributed");
        } else if created > 0 {
            self.store
                .set_finance_status(payment_id, FinanceStatus::PartiallyReleased)
                .await?;
        }
        Ok(())
    }

    /// One reconciliation pass over a payment: re-submits failed transfers and
    /// stale in-flight ones, or escalates when a transfer is out of attempts.
    pub async fn redrive(&self, payment_id: &str) -> Result<RedriveOutcome> {
        let max_attempts = self.config.max_transfer_attempts;
        let claimed = {
            let _guard = self.locks.acquire(payment_id).await;
            let now = Utc::now();
            let payment = self.load_payment(payment_id).await?;
            if payment.status != PaymentStatus::Received || payment.has_dispute {
                return Ok(RedriveOutcome::Skipped);
            }

            let transfers = self.store.transfers_for_payment(payment_id).await?;
            let retryable: Vec<MissionTransfer> = transfers
                .into_iter()
                .filter(|t| self.is_retryable(t, now))
                .collect();

            if retryable.iter().any(|t| t.is_exhausted(max_attempts)) {
                self.escalate_locked(payment_id, now).await?;
                return Ok(RedriveOutcome::Exhausted);
            }
            if retryable.is_empty() {
                self.finalize_locked(payment_id, now).await?;
                let status = self.load_payment(payment_id).await?.status;
                return Ok(if status == PaymentStatus::Distributed {
                    RedriveOutcome::Recovered
                } else {
                    RedriveOutcome::Idle
                });
            }

            let mut claimed = Vec::with_capacity(retryable.len());
            for mut transfer in retryable {
                transfer.begin_attempt(now);
                self.store.update_transfer(&transfer).await?;
                info!(
                    payment_id = %payment_id,
                    transfer_id = %transfer.id,
                    attempt = transfer.attempt_count,
                    "Retrying transfer"
                );
                claimed.push(transfer);
            }
            claimed
        };

        let submissions = self.submit_all(claimed).await;
        self.record_outcomes(payment_id, submissions).await?;

        Ok(match self.load_payment(payment_id).await?.status {
            PaymentStatus::Distributed => RedriveOutcome::Recovered,
            PaymentStatus::Errored => RedriveOutcome::Exhausted,
            _ => RedriveOutcome::Retried,
        })
    }

    fn is_retryable(&self, transfer: &MissionTransfer, now: DateTime<Utc>) -> bool {
        match transfer.status {
            TransferStatus::Failed => true,
            TransferStatus::Pending => {
                let since = transfer.last_attempt_at.unwrap_or(transfer.created_at);
                (now - since)
                    .to_std()
                    .map(|age| age >= self.config.stale_pending_after)
                    .unwrap_or(false)
            }
            TransferStatus::Created | TransferStatus::Reversed => false,
        }
    }
}
