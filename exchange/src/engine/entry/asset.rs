//! Asset and Market Definitions
//!
//! This module defines the tradable assets and the markets pairing them.
//! Assets carry the quantization precision applied to every price or
//! amount expressed in them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::money;

/// A tradable asset known to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Short uppercase code (e.g., "BTC")
    pub code: String,
    /// Human readable name (e.g., "Bitcoin")
    pub name: String,
    /// Fractional digits kept when quantizing values of this asset
    pub precision: u32,
}

impl Asset {
    /// Creates a new asset definition
    ///
    /// # Arguments
    /// * `code` - Short uppercase asset code
    /// * `name` - Display name
    /// * `precision` - Fractional digits for quantization
    pub fn new(code: &str, name: &str, precision: u32) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            precision,
        }
    }

    /// Truncates a value to this asset's precision, rounding toward zero
    pub fn quantize(&self, value: Decimal) -> Decimal {
        money::quantize(value, self.precision)
    }
}

/// A market pairing a base asset against a quote asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Market symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Code of the asset being bought and sold
    pub base_asset: String,
    /// Code of the asset prices are expressed in
    pub quote_asset: String,
    /// Whether the market accepts new orders
    pub active: bool,
}

impl Market {
    /// Creates a new active market
    pub fn new(symbol: &str, base_asset: &str, quote_asset: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            active: true,
        }
    }
}
