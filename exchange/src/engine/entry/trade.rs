//! Trade Record
//!
//! A trade is the immutable record of one match between a buy order and a
//! sell order. The taker side records which side initiated the match.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Store-issued identifier
    pub id: u64,
    /// Market the trade executed in
    pub symbol: String,
    /// Execution price, set by the resting order
    pub price: Decimal,
    /// Executed base-asset amount
    pub amount: Decimal,
    /// Order on the buy side of the match
    pub buy_order_id: u64,
    /// Order on the sell side of the match
    pub sell_order_id: u64,
    /// Side of the incoming order that triggered the match
    pub taker_side: OrderSide,
    /// Execution timestamp in milliseconds
    pub created_at: i64,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        price: Decimal,
        amount: Decimal,
        buy_order_id: u64,
        sell_order_id: u64,
        taker_side: OrderSide,
        created_at: i64,
    ) -> Self {
        Self {
            id: 0,
            symbol: symbol.to_string(),
            price,
            amount,
            buy_order_id,
            sell_order_id,
            taker_side,
            created_at,
        }
    }

    /// Quote-asset value of the trade before quantization
    pub fn total_amount(&self) -> Decimal {
        self.price * self.amount
    }
}
