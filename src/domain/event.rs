//! Processor events as the engine understands them.
//!
//! Webhook bodies arrive as `{id, type, data}`. Known types are parsed into closed
//! variants; anything else becomes [`ProcessorEvent::Unhandled`] so new processor
//! event types never break ingestion.

use crate::error::SettlementError;
use serde::Deserialize;
use serde_json::Value;

/// Raw webhook body before the `data` object is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentSucceeded {
    pub payment_id: String,
    /// Checkout session or payment intent reference.
    pub reference: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Processor fee in minor units.
    #[serde(default)]
    pub fee: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentFailed {
    pub payment_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentRefunded {
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferReversed {
    /// Processor reference of the reversed transfer.
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorEvent {
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
    PaymentRefunded(PaymentRefunded),
    TransferReversed(TransferReversed),
    Unhandled { event_type: String },
}

impl ProcessorEvent {
    pub fn from_type(event_type: &str, data: Value) -> Result<Self, SettlementError> {
        let event = match event_type {
            "checkout.session.completed" | "payment_intent.succeeded" => {
                ProcessorEvent::PaymentSucceeded(serde_json::from_value(data)?)
            }
            "payment_intent.payment_failed" => {
                ProcessorEvent::PaymentFailed(serde_json::from_value(data)?)
            }
            "charge.refunded" => ProcessorEvent::PaymentRefunded(serde_json::from_value(data)?),
            "transfer.reversed" => ProcessorEvent::TransferReversed(serde_json::from_value(data)?),
            other => ProcessorEvent::Unhandled {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }

    /// The payment this event targets, when it targets one directly.
    pub fn payment_id(&self) -> Option<&str> {
        match self {
            ProcessorEvent::PaymentSucceeded(e) => Some(&e.payment_id),
            ProcessorEvent::PaymentFailed(e) => Some(&e.payment_id),
            ProcessorEvent::PaymentRefunded(e) => Some(&e.payment_id),
            ProcessorEvent::TransferReversed(_) | ProcessorEvent::Unhandled { .. } => None,
        }
    }
}

/// An authenticated, parsed event ready for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub id: String,
    pub event_type: String,
    pub event: ProcessorEvent,
}

impl TryFrom<EventEnvelope> for NormalizedEvent {
    type Error = SettlementError;

    fn try_from(envelope: EventEnvelope) -> Result<Self, Self::Error> {
        if envelope.id.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "Event id must not be empty".to_string(),
            ));
        }
        let event = ProcessorEvent::from_type(&envelope.event_type, envelope.data)?;
        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            event,
        })
    }
}
