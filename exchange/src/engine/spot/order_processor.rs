//! Order Processing Module
//!
//! This module provides functionality for processing orders in the spot
//! market. It handles validation, fund reservation, matching and
//! cancellation through a unified interface.
//!
//! Submission is synchronous: the call returns only after every possible
//! match has been attempted and settled, so the returned order already
//! carries its final fill state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::engine::clock::EngineClock;
use crate::engine::entry::{LedgerEntry, LedgerKind, Order, OrderSide, OrderStatus};
use crate::engine::errors::EngineError;
use crate::engine::events::{Event, EventSink};
use crate::engine::matchlogic::matcher::{publish_book, Matcher};
use crate::engine::money::FeePolicy;
use crate::engine::spot::market_manager::ResolvedMarket;
use crate::engine::spot::MarketManager;
use crate::engine::store::{Store, StoreError};
use crate::engine::EngineConfig;

/// Main processor for handling spot market orders
///
/// Matching is serialized per market through a gate mutex; validation,
/// reservation and cancellation run concurrently and rely on row locks
/// alone. The gate is always taken before any row lock and never while
/// one is held.
pub struct OrderProcessor {
    store: Arc<dyn Store>,
    clock: Arc<EngineClock>,
    events: Arc<dyn EventSink>,
    markets: Arc<RwLock<MarketManager>>,
    fees: FeePolicy,
    match_retries: u32,
    book_depth: usize,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<EngineClock>,
        events: Arc<dyn EventSink>,
        markets: Arc<RwLock<MarketManager>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            markets,
            fees: FeePolicy::new(config.fee_rate),
            match_retries: config.match_retries,
            book_depth: config.book_depth,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Places a new limit order
    ///
    /// # Arguments
    /// * `user_id` - Owner of the order
    /// * `symbol` - Market to trade in
    /// * `side` - Buy or sell
    /// * `price` - Limit price, quantized to the quote asset's precision
    /// * `amount` - Base amount, quantized to the base asset's precision
    ///
    /// # Returns
    /// * `Ok(Order)` - The order after all possible matching has settled;
    ///   it may already be partially or fully filled
    /// * `Err(EngineError)` - Typed rejection with nothing persisted
    pub fn submit_limit_order(
        &self,
        user_id: u64,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        let resolved = self.markets.read().unwrap().resolve(symbol)?;
        if price <= dec!(0) || amount <= dec!(0) {
            return Err(EngineError::Validation(format!(
                "price and amount must be positive, got {} and {}",
                price, amount
            )));
        }
        let price = resolved.quote.quantize(price);
        let amount = resolved.base.quantize(amount);
        if price <= dec!(0) || amount <= dec!(0) {
            return Err(EngineError::Validation(format!(
                "price {} or amount {} truncates to zero at market precision",
                price, amount
            )));
        }

        let order = self.with_retries(&format!("submit user {}", user_id), || {
            self.reserve_and_insert(user_id, &resolved, side, price, amount)
        })?;
        log::info!(
            "order {} user {} {} {} {}@{}",
            order.id,
            user_id,
            order.symbol,
            side.as_str(),
            amount,
            price
        );

        let executed = {
            let gate = self.gate(&resolved.market.symbol);
            let _serial = gate.lock().unwrap();
            let matcher = Matcher {
                store: self.store.as_ref(),
                clock: &self.clock,
                events: self.events.as_ref(),
                base: &resolved.base,
                quote: &resolved.quote,
                fees: &self.fees,
                retries: self.match_retries,
                book_depth: self.book_depth,
            };
            matcher.run(order.id)?
        };
        if executed > 0 {
            crate::metrics::TRADE_COUNTER_VEC
                .with_label_values(&[resolved.market.symbol.as_str()])
                .inc_by(executed as f64);
        }

        self.store.order(order.id).ok_or_else(|| {
            EngineError::Internal(format!("order {} missing after matching", order.id))
        })
    }

    /// Cancels an order owned by the user
    ///
    /// # Returns
    /// * `Ok(Order)` - The canceled order, its remaining reservation
    ///   already unlocked
    /// * `Err(EngineError::OrderNotFound)` - Unknown id, or owned by
    ///   someone else
    /// * `Err(EngineError::OrderNotCancelable)` - Already filled or
    ///   canceled
    pub fn cancel_order(&self, user_id: u64, order_id: u64) -> Result<Order, EngineError> {
        let order = self.with_retries(&format!("cancel order {}", order_id), || {
            self.try_cancel(user_id, order_id)
        })?;
        log::info!("order {} user {} canceled", order_id, user_id);
        publish_book(
            self.store.as_ref(),
            self.events.as_ref(),
            &order.symbol,
            self.book_depth,
            self.clock.now_ms(),
        );
        self.events.publish(Event::order_update(&order));
        Ok(order)
    }

    fn reserve_and_insert(
        &self,
        user_id: u64,
        resolved: &ResolvedMarket,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        let (asset_code, reserve) = match side {
            OrderSide::Buy => (
                &resolved.quote.code,
                self.fees
                    .buy_reservation(price, amount, resolved.quote.precision),
            ),
            OrderSide::Sell => (&resolved.base.code, amount),
        };
        let now = self.clock.now_ms();
        let mut txn = self.store.begin();
        let mut bal = txn.lock_balance(user_id, asset_code)?;
        bal.lock(reserve)?;
        txn.update_balance(&bal)?;
        let order = txn.insert_order(Order::new(
            user_id,
            &resolved.market.symbol,
            side,
            price,
            amount,
            now,
        ))?;
        txn.append_ledger(LedgerEntry::new(
            user_id,
            asset_code,
            -reserve,
            LedgerKind::Lock,
            json!({ "order_id": order.id }),
            now,
        ))?;
        txn.commit()?;
        Ok(order)
    }

    fn try_cancel(&self, user_id: u64, order_id: u64) -> Result<Order, EngineError> {
        // unlocked read to learn the reserve asset; owner, side and symbol
        // never change after insert
        let head = self
            .store
            .order(order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if head.user_id != user_id {
            return Err(EngineError::OrderNotFound(order_id));
        }
        let resolved = self.markets.read().unwrap().lookup(&head.symbol)?;
        let asset_code = match head.side {
            OrderSide::Buy => &resolved.quote.code,
            OrderSide::Sell => &resolved.base.code,
        };

        let now = self.clock.now_ms();
        let mut txn = self.store.begin();
        let mut bal = txn.lock_balance(user_id, asset_code)?;
        let mut order = txn.lock_order(order_id)?;
        if !order.is_cancelable() {
            return Err(EngineError::OrderNotCancelable(order_id));
        }
        let remaining = order.remaining();
        let refund = match order.side {
            OrderSide::Buy => self
                .fees
                .buy_reservation(order.price, remaining, resolved.quote.precision),
            OrderSide::Sell => remaining,
        };
        bal.unlock(refund)?;
        txn.update_balance(&bal)?;
        txn.append_ledger(LedgerEntry::new(
            user_id,
            asset_code,
            refund,
            LedgerKind::Unlock,
            json!({ "order_id": order.id }),
            now,
        ))?;
        order.status = OrderStatus::Canceled;
        txn.update_order(&order)?;
        txn.commit()?;
        Ok(order)
    }

    /// Retries an attempt whose transaction lost a bounded lock wait;
    /// domain failures pass straight through
    fn with_retries<T>(
        &self,
        what: &str,
        mut attempt: impl FnMut() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut attempts = 0;
        loop {
            match attempt() {
                Err(EngineError::Store(StoreError::LockTimeout(key))) => {
                    attempts += 1;
                    if attempts > self.match_retries {
                        return Err(EngineError::Transient(format!(
                            "{} gave up after {} lock waits on {:?}",
                            what, attempts, key
                        )));
                    }
                    log::warn!(
                        "{}: lock wait on {:?}, attempt {}/{}",
                        what,
                        key,
                        attempts,
                        self.match_retries
                    );
                }
                other => return other,
            }
        }
    }

    fn gate(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }
}
