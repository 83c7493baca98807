use crate::domain::dispute::DisputeOutcome;
use crate::domain::payment::NewPayment;
use crate::error::{Result, SettlementError};
use serde::Deserialize;
use std::io::BufRead;

fn enabled() -> bool {
    true
}

/// One line of an operator script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    /// Registers a pending payment, as the checkout flow would.
    Checkout(NewPayment),
    PayoutAccount {
        participant_id: String,
        account_id: String,
        #[serde(default = "enabled")]
        payouts_enabled: bool,
    },
    /// A processor webhook: the raw body exactly as signed, plus its header.
    Webhook { payload: String, signature: String },
    Release {
        payment_id: String,
        requested_by: String,
    },
    Dispute {
        payment_id: String,
        reporter_id: String,
        reason: String,
        #[serde(default)]
        description: Option<String>,
    },
    /// Closes the open dispute of a payment.
    Resolve {
        payment_id: String,
        resolver_id: String,
        outcome: DisputeOutcome,
        #[serde(default)]
        resolution: Option<String>,
    },
    Reconcile,
    /// Makes the dry-run processor fail the next `failures` transfers to an account.
    ProcessorOutage { account_id: String, failures: u32 },
}

/// Reads operator scripts in JSON Lines format.
///
/// Blank lines are skipped. A line that does not parse yields an error carrying
/// its line number; the following lines are still read.
pub struct ScriptReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> ScriptReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Returns an iterator that lazily reads and parses operations.
    pub fn operations(self) -> impl Iterator<Item = Result<ScriptOp>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str(&line).map_err(|e| {
                    SettlementError::ValidationError(format!("line {}: {}", index + 1, e))
                })),
                Err(e) => Some(Err(SettlementError::from(e))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_script() {
        let data = r#"{"op":"checkout","id":"p1","mission_id":"m1","payer_id":"r1","freelancer_id":"f1","amount":10000,"currency":"EUR"}

{"op":"payout_account","participant_id":"f1","account_id":"acct_f1"}
{"op":"release","payment_id":"p1","requested_by":"r1"}
{"op":"resolve","payment_id":"p1","resolver_id":"admin","outcome":"rejected"}
{"op":"reconcile"}
"#;
        let ops: Vec<ScriptOp> = ScriptReader::new(data.as_bytes())
            .operations()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(ops.len(), 5);
        match &ops[0] {
            ScriptOp::Checkout(payment) => {
                assert_eq!(payment.amount.minor_units(), 10000);
                assert_eq!(payment.currency.as_str(), "eur");
                assert!(payment.commercial_id.is_none());
            }
            other => panic!("unexpected op {:?}", other),
        }
        assert!(matches!(
            ops[1],
            ScriptOp::PayoutAccount { payouts_enabled: true, .. }
        ));
        assert!(matches!(
            ops[3],
            ScriptOp::Resolve { outcome: DisputeOutcome::Rejected, .. }
        ));
        assert_eq!(ops[4], ScriptOp::Reconcile);
    }

    #[test]
    fn test_reader_reports_bad_line_and_continues() {
        let data = "{\"op\":\"teleport\"}\n{\"op\":\"checkout\",\"id\":\"p1\",\"mission_id\":\"m1\",\"payer_id\":\"r1\",\"freelancer_id\":\"f1\",\"amount\":0,\"currency\":\"eur\"}\n{\"op\":\"reconcile\"}";
        let results: Vec<Result<ScriptOp>> = ScriptReader::new(data.as_bytes()).operations().collect();

        assert_eq!(results.len(), 3);
        match &results[0] {
            Err(SettlementError::ValidationError(message)) => assert!(message.starts_with("line 1:")),
            other => panic!("unexpected result {:?}", other),
        }
        // zero amounts are refused at parse time
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
