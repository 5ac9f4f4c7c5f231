//! Money Arithmetic
//!
//! Quantization and fee rules shared by reservation, settlement, and
//! cancellation. All rounding is truncation toward zero so that no party
//! ever reserves or receives more than it specified.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::engine::errors::EngineError;

/// Truncates a value to the given number of fractional digits
pub fn quantize(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

/// Parses a decimal from caller input, mapping failures to validation errors
pub fn parse_decimal(input: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(input)
        .map_err(|_| EngineError::Validation(format!("malformed decimal {}", input)))
}

/// Fee rule applied to the quote-asset value of trades
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeePolicy {
    pub rate: Decimal,
}

impl FeePolicy {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    /// Fee owed on a quote-asset cost, truncated to the quote precision
    pub fn fee_on(&self, cost: Decimal, quote_precision: u32) -> Decimal {
        quantize(cost * self.rate, quote_precision)
    }

    /// Quote-asset reservation for a BUY: the exact order value plus the
    /// worst-case fee on it
    pub fn buy_reservation(&self, price: Decimal, amount: Decimal, quote_precision: u32) -> Decimal {
        let cost = price * amount;
        cost + self.fee_on(cost, quote_precision)
    }
}
