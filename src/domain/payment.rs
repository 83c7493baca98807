use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a mission payment.
///
/// ```text
/// pending ──▶ received ──▶ distributed
///    │           │
///    ▼           ├──▶ errored
///  failed        └──▶ refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Received,
    Distributed,
    Errored,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Received => "received",
            PaymentStatus::Distributed => "distributed",
            PaymentStatus::Errored => "errored",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Received)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Received, PaymentStatus::Distributed)
                | (PaymentStatus::Received, PaymentStatus::Errored)
                | (PaymentStatus::Received, PaymentStatus::Refunded)
        )
    }

    /// No automatic transition leaves this status. `errored` counts: it waits
    /// for an operator.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Distributed
                | PaymentStatus::Errored
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mission's payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionPayment {
    pub id: String,
    pub mission_id: String,
    pub payer_id: String,
    pub freelancer_id: String,
    pub commercial_id: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PaymentStatus,
    /// Checkout session or payment intent reference at the processor.
    pub processor_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub distributed_at: Option<DateTime<Utc>>,
    pub has_dispute: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the checkout flow knows when it registers a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub id: String,
    pub mission_id: String,
    pub payer_id: String,
    pub freelancer_id: String,
    #[serde(default)]
    pub commercial_id: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
}

impl MissionPayment {
    pub fn new(new: NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            mission_id: new.mission_id,
            payer_id: new.payer_id,
            freelancer_id: new.freelancer_id,
            commercial_id: new.commercial_id,
            amount: new.amount,
            currency: new.currency,
            status: PaymentStatus::Pending,
            processor_reference: None,
            paid_at: None,
            distributed_at: None,
            has_dispute: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_commercial(&self) -> bool {
        self.commercial_id.is_some()
    }

    /// Moves the payment to `next`, stamping the timestamps that go with it.
    ///
    /// Returns `false` and leaves the payment untouched when the transition is not
    /// part of the lifecycle.
    pub fn transition(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            PaymentStatus::Received => self.paid_at = Some(now),
            PaymentStatus::Distributed => self.distributed_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

/// Read-only projection handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatusView {
    pub status: PaymentStatus,
    pub amount: Amount,
    pub currency: Currency,
    pub has_dispute: bool,
}

impl From<&MissionPayment> for PaymentStatusView {
    fn from(payment: &MissionPayment) -> Self {
        Self {
            status: payment.status,
            amount: payment.amount,
            currency: payment.currency.clone(),
            has_dispute: payment.has_dispute,
        }
    }
}
