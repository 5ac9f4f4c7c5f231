//! Market Management Module
//!
//! This module provides functionality for managing assets and the markets
//! that trade them. It handles registration, lookup, and deactivation, and
//! resolves a market symbol into the concrete asset pair the engine needs
//! for quantization and reservations.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::entry::{Asset, Market};
use crate::engine::errors::EngineError;

static ASSET_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{2,10}$").unwrap());
static MARKET_SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,20}$").unwrap());

/// A market symbol resolved to its asset pair, cloned out of the registry
/// so callers hold no lock while they trade against it.
#[derive(Debug, Clone)]
pub struct ResolvedMarket {
    pub market: Market,
    pub base: Asset,
    pub quote: Asset,
}

/// Registry of assets and markets
///
/// Assets are immutable once registered; markets can be deactivated, which
/// stops new submissions while leaving resting orders cancelable.
#[derive(Debug, Clone, Default)]
pub struct MarketManager {
    /// Map of asset codes to their configurations
    assets: HashMap<String, Asset>,
    /// Map of market symbols to their configurations
    markets: HashMap<String, Market>,
}

impl MarketManager {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            assets: HashMap::new(),
            markets: HashMap::new(),
        }
    }

    /// Registers a new asset
    ///
    /// # Arguments
    /// * `asset` - The asset configuration to add
    ///
    /// # Returns
    /// * `Ok(())` - If the asset was added
    /// * `Err(EngineError::Validation)` - If the code is malformed or taken
    pub fn add_asset(&mut self, asset: Asset) -> Result<(), EngineError> {
        if !ASSET_CODE.is_match(&asset.code) {
            return Err(EngineError::Validation(format!(
                "asset code {} is malformed",
                asset.code
            )));
        }
        if self.assets.contains_key(&asset.code) {
            return Err(EngineError::Validation(format!(
                "asset {} already exists",
                asset.code
            )));
        }
        self.assets.insert(asset.code.clone(), asset);
        Ok(())
    }

    /// Registers a new market over two existing assets
    ///
    /// # Arguments
    /// * `market` - The market configuration to add
    ///
    /// # Returns
    /// * `Ok(())` - If the market was added
    /// * `Err(EngineError::Validation)` - If the symbol is malformed or
    ///   taken, or either asset is unknown
    pub fn add_market(&mut self, market: Market) -> Result<(), EngineError> {
        if !MARKET_SYMBOL.is_match(&market.symbol) {
            return Err(EngineError::Validation(format!(
                "market symbol {} is malformed",
                market.symbol
            )));
        }
        if self.markets.contains_key(&market.symbol) {
            return Err(EngineError::Validation(format!(
                "market {} already exists",
                market.symbol
            )));
        }
        if market.base_asset == market.quote_asset {
            return Err(EngineError::Validation(format!(
                "market {} trades an asset against itself",
                market.symbol
            )));
        }
        for code in [&market.base_asset, &market.quote_asset] {
            if !self.assets.contains_key(code) {
                return Err(EngineError::Validation(format!(
                    "market {} references unknown asset {}",
                    market.symbol, code
                )));
            }
        }
        self.markets.insert(market.symbol.clone(), market);
        Ok(())
    }

    /// Retrieves an asset's configuration
    pub fn asset(&self, code: &str) -> Option<&Asset> {
        self.assets.get(code)
    }

    /// Retrieves a market's configuration
    pub fn market(&self, symbol: &str) -> Option<&Market> {
        self.markets.get(symbol)
    }

    /// Lists all registered markets
    pub fn list_markets(&self) -> Vec<&Market> {
        self.markets.values().collect()
    }

    /// Resolves a symbol for trading
    ///
    /// # Returns
    /// * `Ok(ResolvedMarket)` - The market and its asset pair
    /// * `Err(EngineError::InvalidMarket)` - If the symbol is unknown or
    ///   the market is not active
    pub fn resolve(&self, symbol: &str) -> Result<ResolvedMarket, EngineError> {
        let resolved = self.lookup(symbol)?;
        if !resolved.market.active {
            return Err(EngineError::InvalidMarket(symbol.to_string()));
        }
        Ok(resolved)
    }

    /// Resolves a symbol regardless of market status; cancellation and
    /// reads must keep working after a market is deactivated
    pub fn lookup(&self, symbol: &str) -> Result<ResolvedMarket, EngineError> {
        let market = self
            .markets
            .get(symbol)
            .ok_or_else(|| EngineError::InvalidMarket(symbol.to_string()))?;
        let base = self
            .assets
            .get(&market.base_asset)
            .ok_or_else(|| EngineError::InvalidMarket(symbol.to_string()))?;
        let quote = self
            .assets
            .get(&market.quote_asset)
            .ok_or_else(|| EngineError::InvalidMarket(symbol.to_string()))?;
        Ok(ResolvedMarket {
            market: market.clone(),
            base: base.clone(),
            quote: quote.clone(),
        })
    }

    /// Deactivates a market, rejecting new orders but keeping existing
    /// ones cancelable
    ///
    /// # Returns
    /// * `Ok(())` - If the market was deactivated
    /// * `Err(EngineError::InvalidMarket)` - If the symbol is unknown
    pub fn deactivate(&mut self, symbol: &str) -> Result<(), EngineError> {
        match self.markets.get_mut(symbol) {
            Some(market) => {
                market.active = false;
                Ok(())
            }
            None => Err(EngineError::InvalidMarket(symbol.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MarketManager {
        let mut markets = MarketManager::new();
        markets.add_asset(Asset::new("BTC", "Bitcoin", 8)).unwrap();
        markets.add_asset(Asset::new("USDT", "Tether", 2)).unwrap();
        markets
            .add_market(Market::new("BTCUSDT", "BTC", "USDT"))
            .unwrap();
        markets
    }

    #[test]
    fn test_resolve_returns_asset_pair() {
        let markets = registry();
        let resolved = markets.resolve("BTCUSDT").unwrap();
        assert_eq!(resolved.base.code, "BTC");
        assert_eq!(resolved.quote.code, "USDT");
        assert_eq!(resolved.quote.precision, 2);
    }

    #[test]
    fn test_resolve_rejects_unknown_and_inactive() {
        let mut markets = registry();
        assert_eq!(
            markets.resolve("ETHUSDT").unwrap_err(),
            EngineError::InvalidMarket("ETHUSDT".to_string())
        );
        markets.deactivate("BTCUSDT").unwrap();
        assert!(markets.resolve("BTCUSDT").is_err());
        // lookup still succeeds for cancellation paths
        assert!(markets.lookup("BTCUSDT").is_ok());
    }

    #[test]
    fn test_add_market_requires_known_assets() {
        let mut markets = registry();
        let err = markets
            .add_market(Market::new("ETHUSDT", "ETH", "USDT"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_rejects_malformed_codes() {
        let mut markets = MarketManager::new();
        assert!(markets.add_asset(Asset::new("btc", "Bitcoin", 8)).is_err());
        assert!(markets.add_asset(Asset::new("B", "Bitcoin", 8)).is_err());
    }
}
