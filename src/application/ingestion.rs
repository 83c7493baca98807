use super::settlement::{EventEffect, SettlementMachine};
use crate::domain::event::{EventEnvelope, NormalizedEvent};
use crate::domain::ports::{ProcessorRef, RecordStoreRef};
use crate::error::{Result, SettlementError};
use std::sync::Arc;
use tracing::{info, warn};

/// What the gate did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First delivery, handed to the state machine.
    Processed(EventEffect),
    /// The event id was already processed; nothing was touched.
    Duplicate,
    /// The state machine refused the event for good. It stays recorded so
    /// redeliveries short-circuit.
    Rejected(String),
}

/// Authenticates, parses and deduplicates processor webhooks.
pub struct EventGate {
    store: RecordStoreRef,
    processor: ProcessorRef,
    machine: Arc<SettlementMachine>,
}

impl EventGate {
    pub fn new(store: RecordStoreRef, processor: ProcessorRef, machine: Arc<SettlementMachine>) -> Self {
        Self {
            store,
            processor,
            machine,
        }
    }

    /// Verifies the signature and parses the payload. Nothing is read from the
    /// payload before the signature checks out.
    pub fn authenticate(&self, raw_payload: &[u8], signature: &str) -> Result<NormalizedEvent> {
        if !self.processor.verify_event_signature(raw_payload, signature) {
            warn!("Rejected processor event with an invalid signature");
            return Err(SettlementError::InvalidSignature);
        }
        let envelope: EventEnvelope = serde_json::from_slice(raw_payload)?;
        NormalizedEvent::try_from(envelope)
    }

    pub async fn ingest(&self, raw_payload: &[u8], signature: &str) -> Result<IngestOutcome> {
        let event = self.authenticate(raw_payload, signature)?;

        if !self.store.claim_event(&event.id, &event.event_type).await? {
            info!(event_id = %event.id, event_type = %event.event_type, "Duplicate processor event");
            return Ok(IngestOutcome::Duplicate);
        }

        match self.machine.apply_event(&event.event).await {
            Ok(effect) => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    payment_id = ?event.event.payment_id(),
                    effect = ?effect,
                    "Processor event applied"
                );
                Ok(IngestOutcome::Processed(effect))
            }
            Err(err) if err.is_permanent() => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    payment_id = ?event.event.payment_id(),
                    error = %err,
                    "Processor event rejected"
                );
                Ok(IngestOutcome::Rejected(err.to_string()))
            }
            Err(err) => {
                // let the processor's redelivery try again
                self.store.release_event(&event.id).await?;
                Err(err)
            }
        }
    }
}
