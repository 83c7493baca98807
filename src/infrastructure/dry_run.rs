use super::signature::WebhookSigner;
use crate::domain::ports::{PaymentProcessor, TransferRequest};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Ledger {
    /// Idempotency key → processor reference.
    created: HashMap<Uuid, String>,
    accepted: Vec<TransferRequest>,
    calls: HashMap<Uuid, u32>,
    /// Destination account → remaining forced failures.
    outages: HashMap<String, u32>,
    next_reference: u64,
}

/// A processor that moves no money.
///
/// Transfers are recorded in memory and honor their idempotency key the way a
/// real processor does. Outages can be scripted per destination account, which
/// is how operators rehearse the retry path.
#[derive(Clone)]
pub struct DryRunProcessor {
    signer: WebhookSigner,
    latency: Option<Duration>,
    ledger: Arc<Mutex<Ledger>>,
}

impl DryRunProcessor {
    pub fn new(signer: WebhookSigner) -> Self {
        Self {
            signer,
            latency: None,
            ledger: Arc::default(),
        }
    }

    /// Delays every transfer call, e.g. to exercise the call timeout.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `failures` transfers to `account_id` fail.
    pub async fn fail_next(&self, account_id: &str, failures: u32) {
        let mut ledger = self.ledger.lock().await;
        ledger.outages.insert(account_id.to_string(), failures);
    }

    /// Transfers accepted so far, in order, one entry per idempotency key.
    pub async fn accepted_transfers(&self) -> Vec<TransferRequest> {
        self.ledger.lock().await.accepted.clone()
    }

    /// How many times a transfer id was submitted, successful or not.
    pub async fn calls_for(&self, transfer_id: Uuid) -> u32 {
        self.ledger
            .lock()
            .await
            .calls
            .get(&transfer_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaymentProcessor for DryRunProcessor {
    async fn create_transfer(&self, request: TransferRequest) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut ledger = self.ledger.lock().await;
        let key = request.metadata.transfer_id;
        *ledger.calls.entry(key).or_insert(0) += 1;

        if let Some(reference) = ledger.created.get(&key) {
            debug!(transfer_id = %key, reference = %reference, "Idempotent replay of transfer");
            return Ok(reference.clone());
        }

        if let Some(remaining) = ledger.outages.get_mut(&request.destination_account_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SettlementError::Processor(format!(
                    "destination {} is unavailable",
                    request.destination_account_id
                )));
            }
        }

        ledger.next_reference += 1;
        let reference = format!("tr_dry_{:06}", ledger.next_reference);
        ledger.created.insert(key, reference.clone());
        ledger.accepted.push(request);
        Ok(reference)
    }

    fn verify_event_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.signer.verify(payload, signature)
    }
}
