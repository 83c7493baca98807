use crate::domain::payment::PaymentStatus;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Diagnostic, Debug)]
pub enum SettlementError {
    #[error("Invalid event signature")]
    #[diagnostic(code(settlement::invalid_signature))]
    InvalidSignature,

    #[error("Malformed processor event: {0}")]
    #[diagnostic(code(settlement::malformed_event))]
    MalformedEvent(#[from] serde_json::Error),

    #[error("Payment {0} not found")]
    #[diagnostic(code(settlement::payment_not_found))]
    PaymentNotFound(String),

    #[error("Dispute {0} not found")]
    #[diagnostic(code(settlement::dispute_not_found))]
    DisputeNotFound(Uuid),

    #[error("Cannot {action} payment {payment} while it is {current}")]
    #[diagnostic(code(settlement::invalid_transition))]
    InvalidTransition {
        payment: String,
        current: PaymentStatus,
        action: &'static str,
    },

    #[error("Settlement of payment {0} is blocked by an open dispute")]
    #[diagnostic(
        code(settlement::blocked),
        help("resolve the dispute first, then request the release again")
    )]
    SettlementBlocked(String),

    #[error("Transfer {transfer} failed: {reason}")]
    #[diagnostic(code(settlement::transfer_failed))]
    TransferFailed { transfer: Uuid, reason: String },

    #[error("Payout account of {0} cannot receive funds yet")]
    #[diagnostic(code(settlement::payout_account_not_ready))]
    PayoutAccountNotReady(String),

    #[error("Payment {0} exhausted its transfer attempts")]
    #[diagnostic(
        code(settlement::retry_exhausted),
        help("an operator has to settle this payment manually")
    )]
    RetryExhausted(String),

    #[error("Payment {0} already has an open dispute")]
    #[diagnostic(code(settlement::dispute_already_open))]
    DisputeAlreadyOpen(String),

    #[error("Dispute {0} is already closed")]
    #[diagnostic(code(settlement::dispute_already_closed))]
    DisputeAlreadyClosed(Uuid),

    #[error("Validation error: {0}")]
    #[diagnostic(code(settlement::validation))]
    ValidationError(String),

    #[error("Processor error: {0}")]
    #[diagnostic(code(settlement::processor))]
    Processor(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl SettlementError {
    /// Whether redelivering the same input can never produce a different result.
    ///
    /// The ingestion gate keeps permanently rejected events claimed and releases
    /// the claim for everything else so the processor's redelivery can retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SettlementError::PaymentNotFound(_)
                | SettlementError::DisputeNotFound(_)
                | SettlementError::InvalidTransition { .. }
                | SettlementError::SettlementBlocked(_)
                | SettlementError::RetryExhausted(_)
                | SettlementError::DisputeAlreadyOpen(_)
                | SettlementError::DisputeAlreadyClosed(_)
                | SettlementError::ValidationError(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SettlementError {
    fn from(err: rocksdb::Error) -> Self {
        SettlementError::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
