//! Fund distribution for a mission payment.
//!
//! A pure function module: no state, no transfers. Given the gross amount a
//! recruiter paid and whether a commercial agent takes part, it computes how the
//! money is split:
//! - 85% → freelancer
//! - 15% → platform fee
//! - 4% of the gross → commercial commission, carved out of the platform fee
//!
//! The freelancer and commercial shares are floored on minor units and the
//! platform keeps whatever is left, so `freelancer + platform_fee == gross` holds
//! exactly for every input.

use crate::error::SettlementError;
use serde::{Deserialize, Serialize};

/// Freelancer share of the gross amount, in percent.
pub const FREELANCER_SHARE_PERCENT: u64 = 85;

/// Commercial commission, in percent of the gross amount.
pub const COMMERCIAL_SHARE_PERCENT: u64 = 4;

/// The computed split of one gross amount, all values in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundSplit {
    pub freelancer_amount: u64,
    pub platform_fee_amount: u64,
    pub commercial_fee_amount: u64,
    pub platform_net_amount: u64,
}

impl FundSplit {
    /// Total that leaves the platform's custody as transfers.
    pub fn payable_amount(&self) -> u64 {
        self.freelancer_amount + self.commercial_fee_amount
    }
}

fn percent_of(gross: u64, percent: u64) -> u64 {
    // u128 keeps `gross * percent` from overflowing near u64::MAX.
    ((u128::from(gross) * u128::from(percent)) / 100) as u64
}

/// Splits `gross_amount` between freelancer, platform and optional commercial agent.
pub fn compute_split(gross_amount: u64, has_commercial: bool) -> Result<FundSplit, SettlementError> {
    if gross_amount == 0 {
        return Err(SettlementError::ValidationError(
            "Gross amount must be positive".to_string(),
        ));
    }

    let freelancer_amount = percent_of(gross_amount, FREELANCER_SHARE_PERCENT);
    let commercial_fee_amount = if has_commercial {
        percent_of(gross_amount, COMMERCIAL_SHARE_PERCENT)
    } else {
        0
    };
    let platform_fee_amount = gross_amount - freelancer_amount;
    // floor(4%) never exceeds gross - floor(85%) >= 15%
    let platform_net_amount = platform_fee_amount - commercial_fee_amount;

    Ok(FundSplit {
        freelancer_amount,
        platform_fee_amount,
        commercial_fee_amount,
        platform_net_amount,
    })
}
