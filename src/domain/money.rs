use crate::error::SettlementError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive amount expressed in integer minor units (cents).
///
/// All settlement arithmetic happens on these integers; `Decimal` only shows up
/// when an amount is rendered for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(minor_units: u64) -> Result<Self, SettlementError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(SettlementError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }

    /// The amount in major units with two decimal places, e.g. `100.00`.
    pub fn to_major(&self) -> Decimal {
        to_major(self.0)
    }
}

impl TryFrom<u64> for Amount {
    type Error = SettlementError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

/// Renders raw minor units as a two-decimal major-unit value.
pub fn to_major(minor_units: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(minor_units), 2)
}

/// ISO-4217 currency code, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, SettlementError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_lowercase()))
        } else {
            Err(SettlementError::ValidationError(format!(
                "Invalid currency code '{}'",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = SettlementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
