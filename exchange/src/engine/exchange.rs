//! Exchange Facade
//!
//! Wires the store, clock, market registry, wallet and order processor
//! into one engine value. This is the surface a transport layer calls;
//! everything underneath depends only on the store interface.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::engine::clock::EngineClock;
use crate::engine::entry::{Asset, Balance, LedgerEntry, Market, Order, OrderSide, Trade};
use crate::engine::errors::EngineError;
use crate::engine::events::EventSink;
use crate::engine::spot::{MarketManager, OrderProcessor, WalletService};
use crate::engine::store::{MemoryStore, Store};
use crate::metrics::record_metrics;

/// Tunables threaded through the engine at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fee rate applied to the quote cost of every trade, on both sides
    pub fee_rate: Decimal,
    /// Bound on any single row lock wait
    pub lock_wait_ms: u64,
    /// Attempts per transaction before a lock wait surfaces as transient
    pub match_retries: u32,
    /// Price levels per side in published order book snapshots
    pub book_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.001),
            lock_wait_ms: 500,
            match_retries: 3,
            book_depth: 50,
        }
    }
}

/// The assembled trading engine
pub struct Exchange {
    store: Arc<dyn Store>,
    markets: Arc<RwLock<MarketManager>>,
    orders: OrderProcessor,
    wallet: WalletService,
}

impl Exchange {
    /// Builds an engine over a fresh in-memory store
    pub fn new(config: &EngineConfig, events: Arc<dyn EventSink>) -> Self {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(config.lock_wait_ms)));
        Self::with_store(store, config, events)
    }

    /// Builds an engine over any store implementation
    pub fn with_store(
        store: Arc<dyn Store>,
        config: &EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let clock = Arc::new(EngineClock::new());
        let markets = Arc::new(RwLock::new(MarketManager::new()));
        let orders = OrderProcessor::new(
            store.clone(),
            clock.clone(),
            events,
            markets.clone(),
            config,
        );
        let wallet = WalletService::new(store.clone(), clock, markets.clone());
        Self {
            store,
            markets,
            orders,
            wallet,
        }
    }

    /// Registers an asset
    pub fn add_asset(&self, asset: Asset) -> Result<(), EngineError> {
        self.markets.write().unwrap().add_asset(asset)
    }

    /// Registers a market over two existing assets
    pub fn add_market(&self, market: Market) -> Result<(), EngineError> {
        self.markets.write().unwrap().add_market(market)
    }

    /// Stops new submissions on a market; resting orders stay cancelable
    pub fn deactivate_market(&self, symbol: &str) -> Result<(), EngineError> {
        self.markets.write().unwrap().deactivate(symbol)
    }

    /// Lists all registered markets
    pub fn list_markets(&self) -> Vec<Market> {
        self.markets
            .read()
            .unwrap()
            .list_markets()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Places a limit order and matches it to completion
    pub fn submit_limit_order(
        &self,
        user_id: u64,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        record_metrics("submit_limit_order", || {
            self.orders
                .submit_limit_order(user_id, symbol, side, price, amount)
        })
    }

    /// Cancels an order and returns its remaining reservation
    pub fn cancel_order(&self, user_id: u64, order_id: u64) -> Result<Order, EngineError> {
        record_metrics("cancel_order", || {
            self.orders.cancel_order(user_id, order_id)
        })
    }

    /// Credits a user's available balance
    pub fn deposit(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        record_metrics("deposit", || self.wallet.deposit(user_id, asset, amount))
    }

    /// Debits a user's available balance
    pub fn withdraw(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        record_metrics("withdraw", || self.wallet.withdraw(user_id, asset, amount))
    }

    /// Seeds a fresh account with its starting balance
    pub fn credit_initial(
        &self,
        user_id: u64,
        asset: &str,
        amount: Decimal,
    ) -> Result<Balance, EngineError> {
        self.wallet.credit_initial(user_id, asset, amount)
    }

    /// Open and partially filled orders for a user, newest first
    pub fn open_orders(&self, user_id: u64) -> Vec<Order> {
        self.store.open_orders(user_id)
    }

    /// Order history across all states, newest first
    pub fn order_history(&self, user_id: u64, limit: usize) -> Vec<Order> {
        self.store.user_orders(user_id, limit)
    }

    /// A single order, visible only to its owner
    pub fn order(&self, user_id: u64, order_id: u64) -> Result<Order, EngineError> {
        match self.store.order(order_id) {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(EngineError::OrderNotFound(order_id)),
        }
    }

    /// Latest trades in a market, newest first
    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>, EngineError> {
        self.markets.read().unwrap().lookup(symbol)?;
        Ok(self.store.trades_by_symbol(symbol, limit))
    }

    /// All balance rows for a user, ordered by asset code
    pub fn balances(&self, user_id: u64) -> Vec<Balance> {
        self.store.balances(user_id)
    }

    /// One balance row, zeros if the user never touched the asset
    pub fn balance(&self, user_id: u64, asset: &str) -> Balance {
        self.store.balance(user_id, asset)
    }

    /// Ledger entries for a user, newest first
    pub fn ledger(&self, user_id: u64, limit: usize) -> Vec<LedgerEntry> {
        self.store.ledger(user_id, limit)
    }

    /// Aggregated order book as (bids descending, asks ascending)
    #[allow(clippy::type_complexity)]
    pub fn order_book(
        &self,
        symbol: &str,
        levels: usize,
    ) -> Result<(Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>), EngineError> {
        self.markets.read().unwrap().lookup(symbol)?;
        Ok((
            self.store.depth(symbol, OrderSide::Buy, levels),
            self.store.depth(symbol, OrderSide::Sell, levels),
        ))
    }
}
