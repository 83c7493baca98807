use super::settlement::{RedriveOutcome, SettlementMachine};
use crate::domain::transfer::TransferStatus;
use crate::error::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Tally of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retried: usize,
    pub recovered: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub idle: usize,
    /// Payments whose pass ended in an error; they are picked up next sweep.
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: RedriveOutcome) {
        match outcome {
            RedriveOutcome::Retried => self.retried += 1,
            RedriveOutcome::Recovered => self.recovered += 1,
            RedriveOutcome::Exhausted => self.exhausted += 1,
            RedriveOutcome::Skipped => self.skipped += 1,
            RedriveOutcome::Idle => self.idle += 1,
        }
    }

    pub fn visited(&self) -> usize {
        self.retried + self.recovered + self.exhausted + self.skipped + self.idle + self.errors
    }
}

/// Re-drives payments whose transfers failed or stalled.
///
/// Each payment is handled in its own task; the per-payment lock inside the
/// state machine serializes a sweep against concurrent release requests.
#[derive(Clone)]
pub struct ReconciliationDriver {
    machine: Arc<SettlementMachine>,
}

impl ReconciliationDriver {
    pub fn new(machine: Arc<SettlementMachine>) -> Self {
        Self { machine }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let store = self.machine.store();
        let mut payment_ids = BTreeSet::new();
        for status in [TransferStatus::Failed, TransferStatus::Pending] {
            for transfer in store.transfers_with_status(status).await? {
                payment_ids.insert(transfer.payment_id);
            }
        }

        let mut tasks = JoinSet::new();
        for payment_id in payment_ids {
            // errored payments keep their failed transfers but are never retried
            match store.get_payment(&payment_id).await? {
                Some(payment) if !payment.status.is_terminal() => {}
                _ => continue,
            }
            let machine = self.machine.clone();
            tasks.spawn(async move {
                let outcome = machine.redrive(&payment_id).await;
                (payment_id, outcome)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((payment_id, Ok(outcome))) => {
                    debug!(payment_id = %payment_id, outcome = ?outcome, "Reconciled payment");
                    report.record(outcome);
                }
                Ok((payment_id, Err(e))) => {
                    error!(payment_id = %payment_id, error = %e, "Reconciliation pass failed");
                    report.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation task panicked");
                    report.errors += 1;
                }
            }
        }

        if report.visited() > 0 {
            info!(
                retried = report.retried,
                recovered = report.recovered,
                exhausted = report.exhausted,
                skipped = report.skipped,
                errors = report.errors,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Runs `sweep` every `period` until the handle is stopped.
    pub fn spawn(self, period: Duration) -> ReconcilerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!(period = ?period, "Starting reconciliation loop");
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            info!("Reconciliation loop stopped");
        });
        ReconcilerHandle { shutdown, join }
    }
}

/// Handle on a running reconciliation loop.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "Reconciliation loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::locks::PaymentLocks;
    use crate::config::SettlementConfig;
    use crate::domain::event::{PaymentSucceeded, ProcessorEvent};
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::{NewPayment, PaymentStatus};
    use crate::domain::ports::PaymentRecordStore;
    use crate::infrastructure::dry_run::DryRunProcessor;
    use crate::infrastructure::in_memory::{InMemoryPayoutDirectory, InMemoryRecordStore};
    use crate::infrastructure::signature::WebhookSigner;

    struct Fixture {
        driver: ReconciliationDriver,
        machine: Arc<SettlementMachine>,
        store: InMemoryRecordStore,
        processor: DryRunProcessor,
    }

    async fn fixture(config: SettlementConfig) -> Fixture {
        let store = InMemoryRecordStore::new();
        let directory = InMemoryPayoutDirectory::new();
        directory.register("freelancer-1", "acct_f1", true).await;
        let processor = DryRunProcessor::new(WebhookSigner::new("whsec_test", None));
        let machine = Arc::new(SettlementMachine::new(
            Arc::new(store.clone()),
            Arc::new(directory),
            Arc::new(processor.clone()),
            PaymentLocks::new(),
            config,
        ));
        Fixture {
            driver: ReconciliationDriver::new(machine.clone()),
            machine,
            store,
            processor,
        }
    }

    async fn received(machine: &SettlementMachine, id: &str) {
        machine
            .open_checkout(NewPayment {
                id: id.to_string(),
                mission_id: format!("mission-{}", id),
                payer_id: "recruiter-1".to_string(),
                freelancer_id: "freelancer-1".to_string(),
                commercial_id: None,
                amount: Amount::new(10000).unwrap(),
                currency: Currency::new("eur").unwrap(),
            })
            .await
            .unwrap();
        machine
            .apply_event(&ProcessorEvent::PaymentSucceeded(PaymentSucceeded {
                payment_id: id.to_string(),
                reference: format!("cs_{}", id),
                amount: Some(10000),
                currency: Some("eur".to_string()),
                fee: None,
            }))
            .await
            .unwrap();
    }

    async fn status(store: &InMemoryRecordStore, id: &str) -> PaymentStatus {
        store.get_payment(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_sweep_recovers_failed_transfers() {
        let f = fixture(SettlementConfig::default()).await;
        received(&f.machine, "p1").await;
        f.processor.fail_next("acct_f1", 1).await;

        let report = f.machine.request_release("p1", "recruiter-1").await.unwrap();
        assert!(!report.is_settled());

        let sweep = f.driver.sweep().await.unwrap();
        assert_eq!(sweep.recovered, 1);
        assert_eq!(status(&f.store, "p1").await, PaymentStatus::Distributed);
        assert_eq!(f.processor.accepted_transfers().await.len(), 1);

        // nothing left to do
        assert_eq!(f.driver.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_escalates_after_ceiling() {
        let f = fixture(SettlementConfig::default()).await;
        received(&f.machine, "p1").await;
        f.processor.fail_next("acct_f1", 10).await;

        f.machine.request_release("p1", "recruiter-1").await.unwrap();
        f.driver.sweep().await.unwrap();
        let last = f.driver.sweep().await.unwrap();
        assert_eq!(last.exhausted, 1);
        assert_eq!(status(&f.store, "p1").await, PaymentStatus::Errored);

        let transfers = f.store.transfers_for_payment("p1").await.unwrap();
        assert_eq!(transfers[0].attempt_count, 3);
        assert_eq!(f.processor.calls_for(transfers[0].id).await, 3);

        // errored payments drop out of the sweep entirely
        assert_eq!(f.driver.sweep().await.unwrap(), SweepReport::default());
        assert_eq!(f.driver.sweep().await.unwrap(), SweepReport::default());
        assert_eq!(f.processor.calls_for(transfers[0].id).await, 3);
    }

    #[tokio::test]
    async fn test_sweep_skips_disputed_payments() {
        let f = fixture(SettlementConfig::default()).await;
        received(&f.machine, "p1").await;
        f.processor.fail_next("acct_f1", 1).await;
        f.machine.request_release("p1", "recruiter-1").await.unwrap();
        f.store.set_dispute_flag("p1", true).await.unwrap();

        let sweep = f.driver.sweep().await.unwrap();
        assert_eq!(sweep.skipped, 1);
        assert_eq!(status(&f.store, "p1").await, PaymentStatus::Received);
    }

    #[tokio::test]
    async fn test_sweep_handles_many_payments() {
        let f = fixture(SettlementConfig::default()).await;
        for i in 0..5 {
            received(&f.machine, &format!("p{}", i)).await;
        }
        f.processor.fail_next("acct_f1", 5).await;
        for i in 0..5 {
            f.machine.request_release(&format!("p{}", i), "recruiter-1").await.unwrap();
        }

        let sweep = f.driver.sweep().await.unwrap();
        assert_eq!(sweep.recovered, 5);
        assert_eq!(f.processor.accepted_transfers().await.len(), 5);
    }

    #[tokio::test]
    async fn test_background_loop_stops() {
        let config = SettlementConfig {
            sweep_interval: Duration::from_millis(10),
            ..SettlementConfig::default()
        };
        let f = fixture(config.clone()).await;
        received(&f.machine, "p1").await;
        f.processor.fail_next("acct_f1", 1).await;
        f.machine.request_release("p1", "recruiter-1").await.unwrap();

        let handle = f.driver.clone().spawn(config.sweep_interval);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert_eq!(status(&f.store, "p1").await, PaymentStatus::Distributed);
    }
}
